//! Hand the finished image back to the user who invoked us through sudo
//! (or through the helper container, which forwards the uid the same way).

use std::path::Path;

use crate::environment::InvokingUserContext;
use crate::error::Error;

/// Change the owner of `path` to the invoking user.
///
/// Returns `Ok(None)` when there is no invoking user to restore, otherwise
/// the uid the file now belongs to.
pub fn fix_ownership(path: &Path, user: &InvokingUserContext) -> Result<Option<u32>, Error> {
    let Some(uid) = user.original_uid else {
        tracing::debug!("no invoking user recorded, leaving {} as is", path.display());
        return Ok(None);
    };
    let gid = user.group().unwrap_or(uid);

    chown(path, uid, gid).map_err(|detail| Error::OwnershipFixFailure {
        path: path.to_path_buf(),
        uid,
        detail,
    })?;
    tracing::info!(uid, gid, "restored ownership of {}", path.display());
    Ok(Some(uid))
}

#[cfg(unix)]
fn chown(path: &Path, uid: u32, gid: u32) -> Result<(), String> {
    std::os::unix::fs::chown(path, Some(uid), Some(gid)).map_err(|e| e.to_string())
}

#[cfg(not(unix))]
fn chown(_path: &Path, _uid: u32, _gid: u32) -> Result<(), String> {
    Err("changing file ownership is not supported on this platform".to_string())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::MetadataExt;

    #[test]
    fn test_no_invoking_user_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("vm.raw");
        fs::write(&file, b"disk").unwrap();

        let owner = fix_ownership(&file, &InvokingUserContext::default()).unwrap();
        assert_eq!(owner, None);
    }

    #[test]
    fn test_restores_to_own_uid() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("vm.raw");
        fs::write(&file, b"disk").unwrap();
        let meta = fs::metadata(&file).unwrap();

        let user = InvokingUserContext {
            original_uid: Some(meta.uid()),
            original_gid: Some(meta.gid()),
        };
        assert_eq!(fix_ownership(&file, &user).unwrap(), Some(meta.uid()));
        assert_eq!(fs::metadata(&file).unwrap().uid(), meta.uid());
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let user = InvokingUserContext {
            original_uid: Some(1000),
            original_gid: None,
        };
        let err = fix_ownership(&dir.path().join("absent.qcow2"), &user).unwrap_err();
        assert!(matches!(err, Error::OwnershipFixFailure { uid: 1000, .. }));
    }
}
