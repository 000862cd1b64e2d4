mod support;

use std::sync::Arc;

use tempfile::TempDir;

use omniurl_core::prelude::*;

#[test]
fn absolute_keys_parse_back_to_the_same_url() {
    let temp = TempDir::new().unwrap();
    let path = support::write_file(temp.path(), "dir/a b.yaml", b"a: 1\n");
    let context = Context::new().into_shared();

    let url: Url = context.new_valid_file_url(&path).unwrap().into();
    let key = url.key();
    assert!(key.starts_with("file:///"), "{key}");

    let reparsed = context.new_url(&key).unwrap();
    assert_eq!(reparsed, url);
    assert_eq!(reparsed.read_string(&CancellationToken::new()).unwrap(), "a: 1\n");
}

#[test]
fn relative_file_urls_keep_relative_keys() {
    let context = Context::new().into_shared();
    let url = context.new_url("charts/values.yaml").unwrap();
    assert_eq!(url.key(), "file:charts/values.yaml");
    assert_eq!(url.to_string(), "charts/values.yaml");
    assert_eq!(context.new_url("file:charts/values.yaml").unwrap(), url);
}

#[test]
fn directories_need_a_trailing_separator() {
    let temp = TempDir::new().unwrap();
    support::write_file(temp.path(), "sub/a.txt", b"a");
    let context = Context::new().into_shared();

    let dir = format!("{}/sub/", temp.path().display());
    let url = context.new_valid_file_url(&dir).unwrap();
    assert!(url.is_dir());
    assert!(url.key().ends_with("/sub/"));

    let err = context
        .new_valid_file_url(temp.path().join("sub"))
        .unwrap_err();
    assert!(err.is_not_found());

    let err = context
        .new_valid_file_url(format!("{}/sub/a.txt/", temp.path().display()))
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn relative_resolves_against_the_base() {
    let temp = TempDir::new().unwrap();
    let main = support::write_file(temp.path(), "app/main.yaml", b"main");
    support::write_file(temp.path(), "lib/common.yaml", b"common");
    let context = Arc::new(Context::new());

    let url: Url = context.new_valid_file_url(&main).unwrap().into();
    let sibling = url.base().valid_relative("../lib/common.yaml", &CancellationToken::new());
    let sibling = sibling.unwrap();
    assert_eq!(
        sibling.read_string(&CancellationToken::new()).unwrap(),
        "common"
    );
    assert_eq!(sibling.format(), "yaml");
}

#[test]
fn missing_files_are_not_found() {
    let temp = TempDir::new().unwrap();
    let context = Context::new().into_shared();
    let url = context.new_file_url(temp.path().join("absent.txt"));
    assert!(url.validate().unwrap_err().is_not_found());
    assert!(url.open(&CancellationToken::new()).err().expect("expected open to fail").is_not_found());
}

#[test]
fn cancelled_reads_fail() {
    let temp = TempDir::new().unwrap();
    let path = support::write_file(temp.path(), "big.bin", &vec![7u8; 64 * 1024]);
    let context = Context::new().into_shared();
    let url: Url = context.new_file_url(path).into();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = url.read_bytes(&cancel).unwrap_err();
    assert!(matches!(err, Error::Cancelled), "{err:?}");
}
