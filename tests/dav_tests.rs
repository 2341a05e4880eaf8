#[cfg(target_os = "linux")]
mod dav_tests {
    use webdav_framework::{body::Body, fakels::FakeLs, localfs::LocalFs, DavHandler};
    use http::{Request, StatusCode};

    fn setup_dav_server_symlink(dir: &str) -> DavHandler {
        let base = format!("/tmp/{dir}");
        let _ = std::fs::create_dir(&base);
        let _ = std::fs::create_dir(format!("{base}/normal_dir"));
        let _ = std::os::unix::fs::symlink(
            format!("{base}/normal_dir"),
            format!("{base}/symlink_to_dir"),
        );

        DavHandler::builder()
            // LocalFs is needed to exercise real symlinks.
            .filesystem(LocalFs::new(&base, true, false, false))
            .locksystem(FakeLs::new())
            .autoindex(true)
            .hide_symlinks(true)
            .build_handler()
    }

    async fn resp_to_string(mut resp: http::Response<Body>) -> String {
        use futures_util::StreamExt;

        let mut data = Vec::new();
        let body = resp.body_mut();

        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => data.extend_from_slice(&bytes),
                Err(e) => panic!("Error reading body stream: {}", e),
            }
        }

        String::from_utf8(data).unwrap_or_else(|_| "".to_string())
    }

    #[tokio::test]
    async fn test_dav_symlink_propfind_dir_hides_symlink() {
        let server = setup_dav_server_symlink("DAV_SERVER_TEST_PF");

        let req = Request::builder()
            .method("PROPFIND")
            .uri("/")
            .body(Body::empty())
            .unwrap();

        let resp = server.handle(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
        let resp_text = resp_to_string(resp).await;
        assert!(resp_text.contains("normal_dir"));
        assert!(!resp_text.contains("symlink_to_dir"));
    }

    #[tokio::test]
    async fn test_dav_symlink_get_autoindex_hides_symlink() {
        let server = setup_dav_server_symlink("DAV_SERVER_TEST_GET");

        let req = Request::builder()
            .method("GET")
            .uri("/")
            .body(Body::empty())
            .unwrap();

        let resp = server.handle(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let resp_text = resp_to_string(resp).await;
        assert!(resp_text.contains("normal_dir"));
        assert!(!resp_text.contains("symlink_to_dir"));
    }

    #[tokio::test]
    async fn test_dav_symlink_propfind_one_still_reachable_directly() {
        // hide_symlinks only affects directory *listings*; a client that
        // already knows the name can still PROPFIND it directly.
        let server = setup_dav_server_symlink("DAV_SERVER_TEST_DIRECT");

        let req = Request::builder()
            .method("PROPFIND")
            .uri("/symlink_to_dir")
            .header("depth", "0")
            .body(Body::empty())
            .unwrap();

        let resp = server.handle(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    }

    #[tokio::test]
    async fn test_dav_autoindex_disabled_returns_405() {
        let base = "/tmp/DAV_SERVER_TEST_NOIDX";
        let _ = std::fs::create_dir(base);
        let server = DavHandler::builder()
            .filesystem(LocalFs::new(base, true, false, false))
            .build_handler();

        let req = Request::builder()
            .method("GET")
            .uri("/")
            .body(Body::empty())
            .unwrap();

        let resp = server.handle(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
