//! Directory sends and path resolution across indices, nametags, and
//! aliases.

mod common;

use std::io::Cursor;

use common::TestNet;

use cashweb::dirindex;
use cashweb::protocol::TYPE_DIR;
use cashweb::send::script::RevisionPack;
use cashweb::send::{send_from_path, send_standard_nametag};
use cashweb::{get_by_id, send_from_stream, SendIo};

fn send_file(net: &TestNet, data: &[u8]) -> String {
    send_from_stream(
        &mut Cursor::new(data),
        &net.send_params(),
        &net.wallet,
        &mut SendIo::default(),
    )
    .expect("send file")
    .txid
}

fn send_index(net: &TestNet, index_json: serde_json::Value) -> String {
    let mut raw = Vec::new();
    dirindex::json_to_raw(&index_json, &mut raw).expect("encode index");
    let mut params = net.send_params();
    params.cw_type = TYPE_DIR;
    send_from_stream(
        &mut Cursor::new(&raw),
        &params,
        &net.wallet,
        &mut SendIo::default(),
    )
    .expect("send index")
    .txid
}

fn resolve(net: &TestNet, id: &str) -> Vec<u8> {
    let mut out = Vec::new();
    get_by_id(id, &net.get_params(), &mut out).expect("resolve");
    out
}

#[test]
fn directory_send_round_trips_every_file() {
    let net = TestNet::new();

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), b"<html>home</html>").unwrap();
    std::fs::create_dir(dir.path().join("media")).unwrap();
    std::fs::write(dir.path().join("media").join("pic"), b"pixels").unwrap();

    let mut saved_index = Vec::new();
    let mut io = SendIo {
        recovery: None,
        save_dir: Some(&mut saved_index),
    };
    let report = send_from_path(dir.path(), &net.send_params(), &net.wallet, &mut io)
        .expect("send dir");

    assert_eq!(
        resolve(&net, &format!("{}/index.html", report.txid)),
        b"<html>home</html>"
    );
    assert_eq!(
        resolve(&net, &format!("{}/media/pic", report.txid)),
        b"pixels"
    );

    // the empty path delivers the index itself, matching the saved copy
    assert_eq!(resolve(&net, &format!("{}/", report.txid)), saved_index);

    // and the index translates to JSON with every path present
    let json = dirindex::raw_to_json(&mut Cursor::new(&saved_index)).unwrap();
    let obj = json.as_object().unwrap();
    assert_eq!(obj.len(), 2);
    assert!(obj.contains_key("index.html"));
    assert!(obj.contains_key("media/pic"));
}

#[test]
fn subdir_entry_recurses_into_nametag_with_remainder() {
    let net = TestNet::new();
    let inner_file = send_file(&net, b"inner bytes");

    let inner_index = send_index(&net, serde_json::json!({ "inner.html": inner_file }));
    send_standard_nametag(
        "alias",
        &inner_index,
        &RevisionPack::default(),
        &net.send_params(),
        &net.wallet,
    )
    .expect("claim alias");

    let outer_index = send_index(&net, serde_json::json!({ "dir/": "~alias" }));

    assert_eq!(
        resolve(&net, &format!("{outer_index}/dir/inner.html")),
        b"inner bytes"
    );
}

#[test]
fn path_link_alias_redirects_within_the_index() {
    let net = TestNet::new();
    let page = send_file(&net, b"the page");
    let index = send_index(&net, serde_json::json!({ "index.html": page }));

    let rvp = RevisionPack {
        path_to_replace: Some("/old.html".into()),
        path_replacement: Some("/index.html".into()),
        ..RevisionPack::default()
    };
    send_standard_nametag("site", &index, &rvp, &net.send_params(), &net.wallet)
        .expect("claim site");

    assert_eq!(resolve(&net, "~site/old.html"), b"the page");
    assert_eq!(resolve(&net, "~site/index.html"), b"the page");
}

#[test]
fn requesting_a_missing_path_reports_in_dir_missing() {
    let net = TestNet::new();
    let page = send_file(&net, b"lonely");
    let index = send_index(&net, serde_json::json!({ "only.html": page }));

    let mut out = Vec::new();
    let err = get_by_id(
        &format!("{index}/absent.html"),
        &net.get_params(),
        &mut out,
    )
    .expect_err("must miss");
    assert!(matches!(err, cashweb::Error::InDirMissing));
}

#[test]
fn non_directory_target_with_path_is_not_a_dir() {
    let net = TestNet::new();
    let plain = send_file(&net, b"just a file");

    let mut out = Vec::new();
    let err = get_by_id(&format!("{plain}/anything"), &net.get_params(), &mut out)
        .expect_err("must reject");
    assert!(matches!(err, cashweb::Error::NotADir));
}
