//! Integration tests for the end-to-end request scenarios, driven against
//! the in-memory backends so they run on every platform.

use webdav_framework::{body::Body, fakels::FakeLs, memfs::MemFs, memls::MemLs, DavHandler};

use http::{Request, StatusCode};

fn setup() -> DavHandler {
    DavHandler::builder()
        .filesystem(MemFs::new())
        .locksystem(MemLs::new())
        .build_handler()
}

async fn resp_to_string(mut resp: http::Response<Body>) -> String {
    use futures_util::StreamExt;

    let mut data = Vec::new();
    let body = resp.body_mut();
    while let Some(chunk) = body.next().await {
        data.extend_from_slice(&chunk.unwrap());
    }
    String::from_utf8_lossy(&data).to_string()
}

#[tokio::test]
async fn propfind_allprop_depth_zero_on_collection() {
    let server = setup();

    let req = Request::builder()
        .method("MKCOL")
        .uri("/a/")
        .body(Body::empty())
        .unwrap();
    assert_eq!(server.handle(req).await.unwrap().status(), StatusCode::CREATED);

    let req = Request::builder()
        .method("PROPFIND")
        .uri("/a/")
        .header("depth", "0")
        .body(Body::from("<propfind xmlns=\"DAV:\"><allprop/></propfind>"))
        .unwrap();
    let resp = server.handle(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let text = resp_to_string(resp).await;
    assert!(text.contains("/a/"));
    assert!(text.contains("collection"));
    assert!(text.contains("200"));
}

#[tokio::test]
async fn propfind_named_property_missing() {
    let server = setup();

    let req = Request::builder()
        .method("PUT")
        .uri("/f")
        .body(Body::from("hi"))
        .unwrap();
    assert_eq!(server.handle(req).await.unwrap().status(), StatusCode::CREATED);

    // no propertystore is configured, so a dead property like displayname
    // that was never set has nowhere to come from.
    let req = Request::builder()
        .method("PROPFIND")
        .uri("/f")
        .header("depth", "0")
        .body(Body::from(
            "<propfind xmlns=\"DAV:\"><prop><displayname/></prop></propfind>",
        ))
        .unwrap();
    let resp = server.handle(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let text = resp_to_string(resp).await;
    assert!(text.contains("displayname"));
    assert!(text.contains("404"));
    assert!(!text.contains(">200<"));
}

#[tokio::test]
async fn put_on_unmapped_uri_then_get_roundtrips() {
    let server = setup();

    let req = Request::builder()
        .method("MKCOL")
        .uri("/a/")
        .body(Body::empty())
        .unwrap();
    assert_eq!(server.handle(req).await.unwrap().status(), StatusCode::CREATED);

    let req = Request::builder()
        .method("PUT")
        .uri("/a/b.txt")
        .body(Body::from("hi"))
        .unwrap();
    let resp = server.handle(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert!(resp.headers().get("etag").is_some());

    let req = Request::builder()
        .method("GET")
        .uri("/a/b.txt")
        .body(Body::empty())
        .unwrap();
    let resp = server.handle(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp_to_string(resp).await, "hi");
}

#[tokio::test]
async fn lock_with_conflict() {
    let server = setup();

    let req = Request::builder()
        .method("MKCOL")
        .uri("/a/")
        .body(Body::empty())
        .unwrap();
    assert_eq!(server.handle(req).await.unwrap().status(), StatusCode::CREATED);

    let lockinfo = r#"<?xml version="1.0"?>
<lockinfo xmlns="DAV:">
  <lockscope><exclusive/></lockscope>
  <locktype><write/></locktype>
  <owner>tester</owner>
</lockinfo>"#;

    // lock-null: /a/b.txt doesn't exist yet.
    let req = Request::builder()
        .method("LOCK")
        .uri("/a/b.txt")
        .header("depth", "0")
        .body(Body::from(lockinfo))
        .unwrap();
    let resp = server.handle(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    // an infinite-depth exclusive lock on the parent collection must
    // conflict with the lock already held below it.
    let req = Request::builder()
        .method("LOCK")
        .uri("/a/")
        .header("depth", "infinity")
        .body(Body::from(lockinfo))
        .unwrap();
    let resp = server.handle(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::LOCKED);
    let text = resp_to_string(resp).await;
    assert!(text.contains("no-conflicting-lock"), "body was: {}", text);
    assert!(text.contains("<D:href>/a/b.txt</D:href>"), "body was: {}", text);
}

#[tokio::test]
async fn move_with_missing_token() {
    let server = setup();

    let req = Request::builder()
        .method("MKCOL")
        .uri("/src/")
        .body(Body::empty())
        .unwrap();
    assert_eq!(server.handle(req).await.unwrap().status(), StatusCode::CREATED);

    let lockinfo = r#"<?xml version="1.0"?>
<lockinfo xmlns="DAV:">
  <lockscope><exclusive/></lockscope>
  <locktype><write/></locktype>
  <owner>tester</owner>
</lockinfo>"#;

    let req = Request::builder()
        .method("LOCK")
        .uri("/src/")
        .header("depth", "infinity")
        .body(Body::from(lockinfo))
        .unwrap();
    let resp = server.handle(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // move without submitting the lock token via `If`.
    let req = Request::builder()
        .method("MOVE")
        .uri("/src/")
        .header("destination", "/dst/")
        .body(Body::empty())
        .unwrap();
    let resp = server.handle(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::LOCKED);
    let text = resp_to_string(resp).await;
    assert!(text.contains("lock-token-submitted"), "body was: {}", text);
    assert!(text.contains("<D:href>/src/</D:href>"), "body was: {}", text);

    // source must be unchanged: still reachable, still locked.
    let req = Request::builder()
        .method("PROPFIND")
        .uri("/src/")
        .header("depth", "0")
        .body(Body::from("<propfind xmlns=\"DAV:\"><allprop/></propfind>"))
        .unwrap();
    assert_eq!(server.handle(req).await.unwrap().status(), StatusCode::MULTI_STATUS);
}

#[tokio::test]
async fn range_request_disabled_by_mismatched_if_range() {
    let server = setup();

    let body = "x".repeat(1000);
    let req = Request::builder()
        .method("PUT")
        .uri("/f")
        .body(Body::from(body.clone()))
        .unwrap();
    assert_eq!(server.handle(req).await.unwrap().status(), StatusCode::CREATED);

    // If-Range names an entity tag that can never match the resource's
    // actual (freshly-computed) tag, so range selection must be skipped
    // and the full body returned.
    let req = Request::builder()
        .method("GET")
        .uri("/f")
        .header("range", "bytes=0-99")
        .header("if-range", "\"this-etag-will-never-match\"")
        .body(Body::empty())
        .unwrap();
    let resp = server.handle(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp_to_string(resp).await, body);
}

#[tokio::test]
async fn multi_range_request_merges_abutting_and_serves_multipart() {
    let server = setup();

    let body = "x".repeat(1000);
    let req = Request::builder()
        .method("PUT")
        .uri("/f")
        .body(Body::from(body.clone()))
        .unwrap();
    assert_eq!(server.handle(req).await.unwrap().status(), StatusCode::CREATED);

    // 0-99 and 100-199 abut and must fuse into a single 0-199 part; 400-499
    // stays disjoint, so the response still needs multipart/byteranges.
    let req = Request::builder()
        .method("GET")
        .uri("/f")
        .header("range", "bytes=0-99,100-199,400-499")
        .body(Body::empty())
        .unwrap();
    let resp = server.handle(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    let content_type = resp
        .headers()
        .get(http::header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("multipart/byteranges; boundary="));
    let boundary = content_type.split("boundary=").nth(1).unwrap().to_string();

    let text = resp_to_string(resp).await;
    assert_eq!(text.matches(&format!("--{}", boundary)).count(), 3); // 2 parts + closing delimiter
    assert!(text.contains("Content-Range: bytes 0-199/1000"));
    assert!(text.contains("Content-Range: bytes 400-499/1000"));
    assert!(!text.contains("Content-Range: bytes 0-99/1000"));
    assert!(text.ends_with(&format!("--{}--\r\n", boundary)));
}

#[tokio::test]
async fn unsatisfiable_range_request_returns_416() {
    let server = setup();

    let body = "x".repeat(10);
    let req = Request::builder()
        .method("PUT")
        .uri("/f")
        .body(Body::from(body))
        .unwrap();
    assert_eq!(server.handle(req).await.unwrap().status(), StatusCode::CREATED);

    let req = Request::builder()
        .method("GET")
        .uri("/f")
        .header("range", "bytes=1000-2000")
        .body(Body::empty())
        .unwrap();
    let resp = server.handle(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    let content_range = resp
        .headers()
        .get(http::header::CONTENT_RANGE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(content_range, "bytes */10");
}

#[tokio::test]
async fn proppatch_protected_property_reports_cannot_modify() {
    let server = setup();

    let req = Request::builder()
        .method("PUT")
        .uri("/f")
        .body(Body::from("hi"))
        .unwrap();
    assert_eq!(server.handle(req).await.unwrap().status(), StatusCode::CREATED);

    // getetag is a computed live property with no propertystore backing it,
    // so it can never be set: the 403 propstat must carry
    // <D:error><D:cannot-modify-protected-property/></D:error>.
    let req = Request::builder()
        .method("PROPPATCH")
        .uri("/f")
        .body(Body::from(
            "<propertyupdate xmlns=\"DAV:\"><set><prop><getetag>bogus</getetag></prop></set></propertyupdate>",
        ))
        .unwrap();
    let resp = server.handle(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let text = resp_to_string(resp).await;
    assert!(text.contains("403"), "body was: {}", text);
    assert!(
        text.contains("<D:error><D:cannot-modify-protected-property/></D:error>"),
        "body was: {}",
        text
    );
}

#[tokio::test]
async fn post_is_not_implemented_by_default() {
    // §9 Open Question: POST is permissive and service-defined; the core's
    // only obligation is to dispatch it, not to give it meaning. MemFs
    // doesn't override DavFileSystem::post, so it must fall back to 501.
    let server = setup();

    let req = Request::builder()
        .method("POST")
        .uri("/form")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from("a=1&b=2"))
        .unwrap();
    let resp = server.handle(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);
}
