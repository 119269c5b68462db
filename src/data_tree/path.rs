use crate::ZkError;

/// Checks the usual znode path rules: absolute, no empty or relative components, no trailing
/// slash (except for the root itself), no NUL characters.
pub(crate) fn validate(path: &str) -> Result<(), ZkError> {
    if path == "/" {
        return Ok(());
    }
    if !path.starts_with('/') || path.ends_with('/') || path.contains('\0') {
        return Err(ZkError::BadArguments);
    }
    for component in path[1..].split('/') {
        if component.is_empty() || component == "." || component == ".." {
            return Err(ZkError::BadArguments);
        }
    }
    Ok(())
}

/// Splits a validated, non-root path into its parent path and final component.
pub(crate) fn split(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(i) => (&path[..i], &path[i + 1..]),
        None => ("/", path),
    }
}

/// Joins a parent path and a child name.
pub(crate) fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation() {
        for ok in &["/", "/a", "/a/b", "/a-b/c.d", "/zookeeper/quota"] {
            assert_eq!(validate(ok), Ok(()), "{}", ok);
        }
        for bad in &["", "a", "/a/", "//a", "/a//b", "/a/./b", "/..", "/a\0"] {
            assert_eq!(validate(bad), Err(ZkError::BadArguments), "{:?}", bad);
        }
    }

    #[test]
    fn split_and_join() {
        assert_eq!(split("/a"), ("/", "a"));
        assert_eq!(split("/a/b/c"), ("/a/b", "c"));
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a/b", "c"), "/a/b/c");
    }
}
