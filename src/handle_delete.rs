use futures_util::{future::BoxFuture, FutureExt, StreamExt};
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::conditional::{check_lock_tokens, if_match_get_tokens};
use crate::davheaders::Depth;
use crate::davpath::DavPath;
use crate::errors::{fserror_to_status, DavError};
use crate::fs::{DavMetaData, FsError};
use crate::multierror::MultiError;
use crate::{body::Body, DavInner, DavResult};

// map_err helper.
fn add_status(res: &mut MultiError, path: &DavPath, e: FsError) -> DavError {
    let status = fserror_to_status(e);
    res.add_status(path, status);
    DavError::Status(status)
}

// map_err helper for directories, the result statuscode
// mappings are not 100% the same.
fn dir_status(res: &mut MultiError, path: &DavPath, e: FsError) -> DavError {
    let status = match e {
        FsError::Exists => StatusCode::CONFLICT,
        e => fserror_to_status(e),
    };
    res.add_status(path, status);
    DavError::Status(status)
}

impl DavInner {
    pub(crate) fn delete_items<'a>(
        &'a self,
        res: &'a mut MultiError,
        depth: Depth,
        meta: Box<dyn DavMetaData>,
        path: &'a DavPath,
    ) -> BoxFuture<'a, DavResult<()>>
    {
        async move {
            if !meta.is_dir() {
                debug!("delete_items (file) {} {:?}", path, depth);
                return self.fs.remove_file(path).await.map_err(|e| add_status(res, path, e));
            }
            if depth == Depth::Zero {
                debug!("delete_items (dir) {} {:?}", path, depth);
                return self.fs.remove_dir(path).await.map_err(|e| dir_status(res, path, e));
            }
            debug!("delete_items (recurse) {} {:?}", path, depth);

            // walk over all entries.
            let mut entries = self
                .fs
                .read_dir(path)
                .await
                .map_err(|e| add_status(res, path, e))?;
            let mut result = Ok(());
            while let Some(dirent) = entries.next().await {
                // if metadata() fails, skip to next entry.
                // NOTE: dirent.metadata == symlink_metadata (!)
                let meta = match dirent.metadata().await {
                    Ok(m) => m,
                    Err(e) => {
                        result = Err(add_status(res, path, e));
                        continue;
                    },
                };

                let mut npath = path.clone();
                npath.push_segment(&dirent.name());
                npath.add_slash_if(meta.is_dir());

                // do the actual work. If this fails with a non-fs related error,
                // return immediately.
                if let Err(e) = self.delete_items(res, depth, meta, &npath).await {
                    match e {
                        DavError::Status(_) => {
                            result = Err(e);
                            continue;
                        },
                        _ => return Err(e),
                    }
                }
            }

            // if we got any error, return with the error,
            // and do not try to remove the directory.
            result?;

            self.fs.remove_dir(path).await.map_err(|e| dir_status(res, path, e))
        }
        .boxed()
    }

    pub(crate) async fn handle_delete(self, req: &Request<()>) -> DavResult<Response<Body>> {
        // RFC4918 9.6.1 DELETE for Collections.
        // Note that allowing Depth: 0 is NOT RFC compliant.
        let depth = match req.headers().typed_get::<Depth>() {
            Some(Depth::Infinity) | None => Depth::Infinity,
            Some(Depth::Zero) => Depth::Zero,
            _ => return Err(StatusCode::BAD_REQUEST.into()),
        };

        let mut path = self.path(&req);
        let meta = self.fs.symlink_metadata(&path).await?;
        if meta.is_symlink() {
            if let Ok(m2) = self.fs.metadata(&path).await {
                path.add_slash_if(m2.is_dir());
            }
        }
        path.add_slash_if(meta.is_dir());

        // check the If and If-* headers.
        let tokens = match if_match_get_tokens(&req, Some(&meta), &self.fs, &self.ls, &path).await {
            Ok(t) => t,
            Err(s) => return Err(s.into()),
        };

        // check locks. since we cancel the entire operation if there is
        // a conflicting lock, we do not return a 207 multistatus, but
        // just a simple status.
        let principal = self.principal.as_ref().map(|s| s.as_str());
        check_lock_tokens(&self.ls, &path, principal, &tokens, true)?;

        let mut multierror = MultiError::new(path.clone());

        if self.delete_items(&mut multierror, depth, meta, &path).await.is_ok() {
            if let Some(ref locksystem) = self.ls {
                locksystem.delete(&path).ok();
            }
            if let Some(ref ps) = self.ps {
                let _ = ps.clear(&path, true).await;
            }
            multierror.add_status(&path, StatusCode::NO_CONTENT);
            return multierror.response().map_err(Into::into);
        }

        multierror.response().map_err(Into::into)
    }
}
