use futures_util::{future::BoxFuture, FutureExt, StreamExt};
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::conditional::{check_lock_tokens, if_match_get_tokens};
use crate::davheaders::{Depth, Destination, Overwrite};
use crate::davpath::DavPath;
use crate::errors::{fserror_to_status, DavError};
use crate::fs::{DavMetaData, FsError, FsResult};
use crate::multierror::MultiError;
use crate::propstore::PropPatch;
use crate::util::DavMethod as Method;
use crate::{body::Body, DavInner, DavResult};

// map_err helper.
fn add_status(res: &mut MultiError, path: &DavPath, e: FsError) -> DavError {
    let status = fserror_to_status(e);
    res.add_status(path, status);
    DavError::Status(status)
}

impl DavInner {
    // dead properties follow the content they're attached to: after a
    // successful copy/move of `source` to `dest`, transplant whatever the
    // propstore has for `source` onto `dest` (§9: no cross-backend sync is
    // attempted, this is a plain get_all/patch/clear against our own store).
    async fn copy_deadprops(&self, source: &DavPath, dest: &DavPath) {
        if let Some(ref ps) = self.ps {
            if let Ok(props) = ps.get_all(source).await {
                if !props.is_empty() {
                    let patch = props.into_iter().map(PropPatch::Set).collect();
                    let _ = ps.patch(dest, patch).await;
                }
            }
        }
    }

    async fn move_deadprops(&self, source: &DavPath, dest: &DavPath) {
        self.copy_deadprops(source, dest).await;
        if let Some(ref ps) = self.ps {
            let _ = ps.clear(source, false).await;
        }
    }

    fn do_copy<'a>(
        &'a self,
        source: &'a DavPath,
        topdest: &'a DavPath,
        dest: &'a DavPath,
        depth: Depth,
        multierror: &'a mut MultiError,
    ) -> BoxFuture<'a, FsResult<()>>
    {
        async move {
            debug!("do_copy {} {} depth {:?}", source, dest, depth);

            // when doing "COPY /a/b /a/b/c" make sure we don't recursively
            // copy /a/b/c/ into /a/b/c.
            if source == topdest {
                return Ok(());
            }

            // source must exist.
            let meta = match self.fs.metadata(source).await {
                Err(e) => {
                    add_status(multierror, source, e);
                    return Err(e);
                },
                Ok(m) => m,
            };

            // if it's a file we can overwrite it.
            if !meta.is_dir() {
                return match self.fs.copy(source, dest).await {
                    Ok(_) => {
                        self.copy_deadprops(source, dest).await;
                        Ok(())
                    },
                    Err(e) => {
                        debug!("do_copy: self.fs.copy error: {:?}", e);
                        add_status(multierror, dest, e);
                        Err(e)
                    },
                };
            }

            // Copying a directory onto an existing directory with Depth 0
            // is not an error. It means "only copy properties" (which
            // we do not do for collections yet).
            if let Err(e) = self.fs.create_dir(dest).await {
                if depth != Depth::Zero || e != FsError::Exists {
                    debug!("do_copy: self.fs.create_dir error: {:?}", e);
                    add_status(multierror, dest, e);
                    return Err(e);
                }
            }
            self.copy_deadprops(source, dest).await;

            // only recurse when Depth > 0.
            if depth == Depth::Zero {
                return Ok(());
            }

            let mut entries = match self.fs.read_dir(source).await {
                Ok(entries) => entries,
                Err(e) => {
                    debug!("do_copy: self.fs.read_dir error: {:?}", e);
                    add_status(multierror, source, e);
                    return Err(e);
                },
            };

            // If we encounter errors, just print them, and keep going.
            // Last seen error is returned from function.
            let mut retval = Ok(());
            while let Some(dirent) = entries.next().await {
                // NOTE: dirent.metadata() behaves like symlink_metadata()
                let meta = match dirent.metadata().await {
                    Ok(meta) => meta,
                    Err(e) => {
                        add_status(multierror, source, e);
                        return Err(e);
                    },
                };
                let name = dirent.name();
                let mut nsrc = source.clone();
                let mut ndest = dest.clone();
                nsrc.push_segment(&name);
                ndest.push_segment(&name);

                if meta.is_dir() {
                    nsrc.add_slash();
                    ndest.add_slash();
                }
                if let Err(e) = self.do_copy(&nsrc, topdest, &ndest, depth, multierror).await {
                    retval = Err(e);
                }
            }

            retval
        }
        .boxed()
    }

    pub(crate) async fn handle_copymove(self, req: &Request<()>, method: Method) -> DavResult<Response<Body>> {
        // get and check headers.
        let overwrite = req.headers().typed_get::<Overwrite>().map_or(true, |o| o.0);
        let depth = match req.headers().typed_get::<Depth>() {
            Some(Depth::Infinity) | None => Depth::Infinity,
            Some(Depth::Zero) if method == Method::Copy => Depth::Zero,
            _ => return Err(StatusCode::BAD_REQUEST.into()),
        };

        // decode and validate destination.
        let dest = req
            .headers()
            .typed_get::<Destination>()
            .ok_or(DavError::Status(StatusCode::BAD_REQUEST))?;
        let dest = DavPath::from_str_and_prefix(&dest.0, &self.prefix)?;

        // for MOVE, tread with care- if the path ends in "/" but it actually
        // is a symlink, we want to move the symlink, not what it points to.
        let mut path = self.path(&req);
        let meta = if method == Method::Move {
            let meta = self.fs.symlink_metadata(&path).await?;
            if meta.is_symlink() {
                let m2 = self.fs.metadata(&path).await?;
                path.add_slash_if(m2.is_dir());
            }
            meta
        } else {
            self.fs.metadata(&path).await?
        };
        path.add_slash_if(meta.is_dir());

        // parent of the destination must exist.
        if !self.has_parent(&dest).await {
            return Err(StatusCode::CONFLICT.into());
        }

        // for the destination, also check if it's a symlink. If we are going
        // to remove it first, we want to remove the link, not what it points to.
        let (dest_is_file, dmeta) = match self.fs.symlink_metadata(&dest).await {
            Ok(meta) => {
                let mut is_file = false;
                if meta.is_symlink() {
                    if let Ok(m) = self.fs.metadata(&dest).await {
                        is_file = m.is_file();
                    }
                }
                if meta.is_file() {
                    is_file = true;
                }
                (is_file, Ok(meta))
            },
            Err(e) => (false, Err(e)),
        };

        // check if overwrite is "F"
        let exists = dmeta.is_ok();
        if !overwrite && exists {
            return Err(StatusCode::PRECONDITION_FAILED.into());
        }

        // check if source == dest
        if path == dest {
            return Err(StatusCode::FORBIDDEN.into());
        }

        // check If and If-* headers for source URL
        let tokens = match if_match_get_tokens(&req, Some(&meta), &self.fs, &self.ls, &path).await {
            Ok(t) => t,
            Err(s) => return Err(s.into()),
        };

        let mut multierror = MultiError::new(path.clone());

        // check locks. since we cancel the entire operation if there is
        // a conflicting lock, we do not return a 207 multistatus, but
        // just a simple status.
        let principal = self.principal.as_ref().map(|s| s.as_str());
        if method == Method::Move {
            // for MOVE check if source path is locked
            check_lock_tokens(&self.ls, &path, principal, &tokens, true)?;
        }
        // for MOVE and COPY check if destination is locked
        check_lock_tokens(&self.ls, &dest, principal, &tokens, true)?;

        // see if we need to delete the destination first.
        if overwrite && exists && depth != Depth::Zero && !dest_is_file {
            debug!("handle_copymove: deleting destination {}", dest);
            if self
                .delete_items(&mut multierror, Depth::Infinity, dmeta.unwrap(), &dest)
                .await
                .is_err()
            {
                return multierror.response().map_err(Into::into);
            }
            // should really do this per item, in case the delete partially fails.
            if let Some(ref locksystem) = self.ls {
                locksystem.delete(&dest).ok();
            }
            if let Some(ref ps) = self.ps {
                let _ = ps.clear(&dest, true).await;
            }
        }

        // COPY or MOVE.
        if method == Method::Copy {
            match self.do_copy(&path, &dest, &dest, depth, &mut multierror).await {
                Err(_) => multierror.response().map_err(Into::into),
                Ok(_) => {
                    let s = if exists { StatusCode::NO_CONTENT } else { StatusCode::CREATED };
                    multierror.add_status(&path, s);
                    multierror.response().map_err(Into::into)
                },
            }
        } else {
            // move and if successful, remove locks and dead properties
            // at the old location.
            match self.fs.rename(&path, &dest).await {
                Ok(_) => {
                    self.move_deadprops(&path, &dest).await;
                    if let Some(ref locksystem) = self.ls {
                        locksystem.delete(&path).ok();
                    }
                    let s = if exists { StatusCode::NO_CONTENT } else { StatusCode::CREATED };
                    multierror.add_status(&path, s);
                    multierror.response().map_err(Into::into)
                },
                Err(e) => {
                    add_status(&mut multierror, &path, e);
                    multierror.response().map_err(Into::into)
                },
            }
        }
    }
}
