//! Content-format inference from path extensions.

/// Derive a format tag such as `yaml` or `tar.gz` from a path.
///
/// The extension is lower-cased. `yml` becomes `yaml`, `tgz` becomes
/// `tar.gz`, and `name.tar.X` becomes `tar.X` for any `X`. A path without an
/// extension yields the empty string.
pub fn get_format(path: &str) -> String {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let Some((stem, extension)) = name.rsplit_once('.') else {
        return String::new();
    };
    if extension.is_empty() {
        return String::new();
    }

    let extension = extension.to_lowercase();

    if let Some(prefix) = stem.len().checked_sub(4)
        && prefix > 0
        && let Some(tail) = stem.get(prefix..)
        && tail.eq_ignore_ascii_case(".tar")
    {
        return format!("tar.{extension}");
    }

    match extension.as_str() {
        "yml" => "yaml".to_string(),
        "tgz" => "tar.gz".to_string(),
        _ => extension,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_extensions_are_lower_cased() {
        assert_eq!(get_format("config.JSON"), "json");
        assert_eq!(get_format("/a/b/c.xml"), "xml");
    }

    #[test]
    fn alternative_extensions_are_normalized() {
        assert_eq!(get_format("x.yml"), "yaml");
        assert_eq!(get_format("x.tgz"), "tar.gz");
        assert_eq!(get_format("x.TGZ"), "tar.gz");
    }

    #[test]
    fn compressed_tarballs_keep_their_tar_prefix() {
        assert_eq!(get_format("x.tar.gz"), "tar.gz");
        assert_eq!(get_format("dir/x.tar.xz"), "tar.xz");
        assert_eq!(get_format("x.TAR.GZ"), "tar.gz");
        assert_eq!(get_format("x.tar"), "tar");
    }

    #[test]
    fn missing_extension_is_empty() {
        assert_eq!(get_format("x"), "");
        assert_eq!(get_format("dir.d/x"), "");
        assert_eq!(get_format("trailing."), "");
    }
}
