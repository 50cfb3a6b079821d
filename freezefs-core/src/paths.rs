use crate::error::{FsError, FsResult};

/// Longest file or folder name the image format stores.
pub const MAX_NAME_LEN: usize = 255;

/// Check a single path segment as stored in the tree index.
pub fn validate_name(name: &str) -> FsResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(FsError::InvalidArgument(format!("bad entry name {:?}", name)));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(FsError::NameTooLong { name: name.to_string(), max: MAX_NAME_LEN });
    }
    Ok(())
}

/// Mount points and deploy targets are absolute and carry no trailing separator,
/// except for the root itself.
pub fn validate_target(target: &str) -> FsResult<()> {
    if !target.starts_with('/') {
        return Err(FsError::InvalidArgument(format!("target must start with /: {:?}", target)));
    }
    if target.len() > 1 && target.ends_with('/') {
        return Err(FsError::InvalidArgument(format!("target must not end with /: {:?}", target)));
    }
    Ok(())
}

/// Split `path` into segments, dropping empty and `.` segments and folding `..`
/// into its parent. Climbing above the root is refused.
pub fn normalize(path: &str) -> FsResult<Vec<&str>> {
    let mut out: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if out.pop().is_none() {
                    return Err(FsError::PermissionDenied(format!("{} escapes the root", path)));
                }
            }
            s => out.push(s),
        }
    }
    Ok(out)
}

/// Render normalized segments back into an absolute path.
pub fn to_absolute(segments: &[&str]) -> String {
    if segments.is_empty() {
        return "/".to_string();
    }
    let mut s = String::new();
    for seg in segments {
        s.push('/');
        s.push_str(seg);
    }
    s
}

/// Resolve `path` against the working directory `cwd` when it is relative.
pub fn absolutize(cwd: &str, path: &str) -> FsResult<String> {
    let joined;
    let full = if path.starts_with('/') {
        path
    } else {
        joined = format!("{}/{}", cwd, path);
        &joined
    };
    Ok(to_absolute(&normalize(full)?))
}

/// If `path` (absolute, normalized) lies under `mount_point`, return the
/// mount-relative remainder.
pub fn strip_mount<'a>(path: &'a str, mount_point: &str) -> Option<&'a str> {
    if mount_point == "/" {
        return Some(path);
    }
    let rest = path.strip_prefix(mount_point)?;
    if rest.is_empty() {
        Some("/")
    } else if rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}
