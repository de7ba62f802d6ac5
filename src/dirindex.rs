//! Directory index: the two-section table mapping paths to identifiers.
//!
//! Section 1 is line-oriented UTF-8. A path entry is a line starting with `/`
//! optionally followed by a resolution line: a cashweb id (inline
//! resolution) or a `.`-prefixed path (recursive lookup into this same
//! index). A path with no resolution line claims the next slot of section 2.
//! An empty line terminates section 1; section 2 is consecutive raw 32-byte
//! txid records, no framing.

use std::io::{BufRead, Seek, SeekFrom, Write};

use serde_json::{Map, Value};

use crate::codec;
use crate::error::{Error, Result};
use crate::identifier::{is_valid_cashweb_id, Identifier};
use crate::protocol::TXID_BYTES;

/// Reads one section-1 line, newline stripped. `None` at end of stream.
fn read_line<R: BufRead>(index: &mut R) -> Result<Option<String>> {
    let mut line = String::new();
    let n = index
        .read_line(&mut line)
        .map_err(|e| Error::Sys(format!("failed reading directory index: {e}")))?;
    if n == 0 {
        return Ok(None);
    }
    if line.ends_with('\n') {
        line.pop();
    }
    Ok(Some(line))
}

/// Walks the index for `path`, returning `(sub_path, identifier)`.
///
/// A declared path equal to `path` resolves directly. A declared path ending
/// in `/` that prefixes `path` resolves with the remainder as `sub_path`; the
/// caller recurses into the resolved identifier with it. Returns
/// [`Error::InDirMissing`] when nothing matches and [`Error::NotADir`] on
/// structural failure.
pub fn path_to_identifier<R: BufRead + Seek>(
    index: &mut R,
    path: &str,
) -> Result<(Option<String>, String)> {
    let dir_path = path.strip_prefix('/').unwrap_or(path);

    let mut count: i64 = 0;
    let mut found = false;
    let mut concluded = false;
    let mut sub_path: Option<String> = None;
    let mut path_id: Option<String> = None;

    while let Some(line) = read_line(index)? {
        if line.is_empty() {
            concluded = true;
            break;
        }
        if found {
            continue;
        }

        if is_valid_cashweb_id(&line) || line.starts_with('.') {
            // resolution line of an earlier, non-matching path
            count -= 1;
            continue;
        }
        let Some(line_path) = line.strip_prefix('/') else {
            break; // malformed section 1
        };
        count += 1;

        let is_sub_dir = line_path.ends_with('/');
        let exact = dir_path == line_path;
        let prefixed = is_sub_dir && {
            let stem = &line_path[..line_path.len() - 1];
            dir_path.strip_prefix(stem).is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        };
        if !exact && !prefixed {
            continue;
        }
        found = true;
        if prefixed && dir_path.len() > line_path.len() - 1 {
            sub_path = Some(
                dir_path[line_path.len() - 1..]
                    .trim_start_matches('/')
                    .to_owned(),
            );
        }

        match read_line(index)? {
            None => break,
            Some(next) if next.is_empty() => {
                concluded = true;
                break;
            }
            Some(next) if is_valid_cashweb_id(&next) => {
                path_id = Some(next);
                count = 0;
                concluded = true;
                break;
            }
            Some(next) if next.starts_with('.') => {
                // alias into this same index; scanning continues forward
                let target = if next.as_bytes().get(1) == Some(&b'/') {
                    next[1..].to_owned()
                } else {
                    next
                };
                return path_to_identifier(index, &target);
            }
            Some(_) => continue, // path declared with no resolution line
        }
    }

    if !concluded {
        return Err(Error::NotADir);
    }

    if path_id.is_none() && count > 0 {
        // the (count-1)-th preceding record of section 2 belongs to the match
        index
            .seek(SeekFrom::Current((count as i64 - 1) * TXID_BYTES as i64))
            .map_err(|_| Error::NotADir)?;
        let mut record = [0u8; TXID_BYTES];
        std::io::Read::read_exact(index, &mut record).map_err(|_| Error::NotADir)?;
        path_id = Some(codec::bytes_to_hex(&record));
    }

    match path_id {
        Some(id) if found => Ok((sub_path, id)),
        _ => Err(Error::InDirMissing),
    }
}

/// Translates a raw index into a JSON object mapping path -> identifier.
/// Section-2 txids are rendered as hex; keys drop the leading `/`.
pub fn raw_to_json<R: BufRead + Seek>(index: &mut R) -> Result<Value> {
    let mut map = Map::new();
    let mut pending: Vec<String> = Vec::new();
    let mut concluded = false;

    while let Some(line) = read_line(index)? {
        if line.is_empty() {
            concluded = true;
            break;
        }
        if is_valid_cashweb_id(&line) || line.starts_with('.') {
            let path = pending.pop().ok_or(Error::NotADir)?;
            map.insert(path, Value::String(line));
            continue;
        }
        let Some(path) = line.strip_prefix('/') else {
            return Err(Error::NotADir);
        };
        pending.push(path.to_owned());
    }
    if !concluded {
        return Err(Error::NotADir);
    }

    // remaining paths claim section-2 records in declaration order
    let mut record = [0u8; TXID_BYTES];
    for path in pending {
        std::io::Read::read_exact(index, &mut record).map_err(|_| Error::NotADir)?;
        map.insert(path, Value::String(codec::bytes_to_hex(&record)));
    }
    Ok(Value::Object(map))
}

/// Translates a JSON path -> identifier object into the raw two-section
/// layout. Nametag and path identifiers are written inline; txids are packed
/// into section 2.
pub fn json_to_raw(index_json: &Value, out: &mut dyn Write) -> Result<()> {
    let obj = index_json
        .as_object()
        .filter(|o| !o.is_empty())
        .ok_or_else(|| Error::BadCall("directory index JSON must be a non-empty object".into()))?;

    let mut section2 = Vec::new();
    for (path, id_val) in obj {
        let id = id_val
            .as_str()
            .ok_or_else(|| Error::BadCall("directory index JSON values must be strings".into()))?;

        if path.starts_with('/') {
            writeln!(out, "{path}").map_err(Error::Write)?;
        } else {
            writeln!(out, "/{path}").map_err(Error::Write)?;
        }

        match id.parse::<Identifier>() {
            Ok(Identifier::Nametag { .. }) | Ok(Identifier::Path { .. }) => {
                writeln!(out, "{id}").map_err(Error::Write)?;
            }
            Ok(Identifier::Txid(_)) => {
                section2.extend_from_slice(&codec::hex_to_bytes(id)?);
            }
            Err(_) => {
                return Err(Error::BadCall(format!(
                    "directory index JSON contains invalid identifier: {id}"
                )));
            }
        }
    }
    writeln!(out).map_err(Error::Write)?;
    out.write_all(&section2).map_err(Error::Write)?;
    Ok(())
}

/// Emits the two-line alias pair the scripting opcode `WRITEPATHLINK` uses,
/// normalising both arguments' leading slashes.
pub fn write_path_link(path: &str, link: &str, out: &mut dyn Write) -> Result<()> {
    let path = path.strip_prefix('/').unwrap_or(path);
    let link = link.strip_prefix('/').unwrap_or(link);
    write!(out, "/{path}\n./{link}\n").map_err(Error::Write)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const TXID_A: &str = "aa4d10ccff6dc33b21b6bd7ba79e14073df1e9b13cd46bbd42e8816394b755d2";
    const TXID_B: &str = "bb1245193cf8c1655b2f6b53a5d99b0f3376cef44bbd9a375ffa0e6d0573cdf0";

    fn index_with_binary(entries: &[(&str, Option<&str>)], records: &[&str]) -> Vec<u8> {
        let mut raw = Vec::new();
        for (path, inline) in entries {
            raw.extend_from_slice(path.as_bytes());
            raw.push(b'\n');
            if let Some(id) = inline {
                raw.extend_from_slice(id.as_bytes());
                raw.push(b'\n');
            }
        }
        raw.push(b'\n');
        for rec in records {
            raw.extend_from_slice(&codec::hex_to_bytes(rec).unwrap());
        }
        raw
    }

    #[test]
    fn looks_up_binary_slot_by_declaration_order() {
        let raw = index_with_binary(
            &[("/a.html", None), ("/b.html", None)],
            &[TXID_A, TXID_B],
        );
        let (sub, id) = path_to_identifier(&mut Cursor::new(&raw), "/b.html").unwrap();
        assert_eq!(sub, None);
        assert_eq!(id, TXID_B);
    }

    #[test]
    fn inline_resolution_does_not_consume_binary_slot() {
        let raw = index_with_binary(
            &[("/alias", Some("~elsewhere")), ("/real", None)],
            &[TXID_A],
        );
        let (_, id) = path_to_identifier(&mut Cursor::new(&raw), "/alias").unwrap();
        assert_eq!(id, "~elsewhere");
        let (_, id) = path_to_identifier(&mut Cursor::new(&raw), "/real").unwrap();
        assert_eq!(id, TXID_A);
    }

    #[test]
    fn subdir_prefix_splits_remainder() {
        let raw = index_with_binary(&[("/dir/", Some("~alias"))], &[]);
        let (sub, id) = path_to_identifier(&mut Cursor::new(&raw), "/dir/inner.html").unwrap();
        assert_eq!(sub.as_deref(), Some("inner.html"));
        assert_eq!(id, "~alias");

        // the bare directory path resolves with no remainder
        let (sub, id) = path_to_identifier(&mut Cursor::new(&raw), "/dir").unwrap();
        assert_eq!(sub, None);
        assert_eq!(id, "~alias");
    }

    #[test]
    fn dot_line_recurses_forward() {
        let raw = index_with_binary(
            &[("/old.html", Some("./new.html")), ("/new.html", None)],
            &[TXID_A],
        );
        let (_, id) = path_to_identifier(&mut Cursor::new(&raw), "/old.html").unwrap();
        assert_eq!(id, TXID_A);
    }

    #[test]
    fn missing_path_and_malformed_index() {
        let raw = index_with_binary(&[("/a", None)], &[TXID_A]);
        assert!(matches!(
            path_to_identifier(&mut Cursor::new(&raw), "/nope"),
            Err(Error::InDirMissing)
        ));
        // no terminating empty line
        let broken = b"/a\n".to_vec();
        assert!(matches!(
            path_to_identifier(&mut Cursor::new(&broken), "/a"),
            Err(Error::NotADir)
        ));
    }

    #[test]
    fn json_round_trip_is_identity() {
        let json: Value = serde_json::json!({
            "index.html": TXID_A,
            "media/pic": TXID_B,
            "mirror": "~mirrorsite/pic",
        });
        let mut raw = Vec::new();
        json_to_raw(&json, &mut raw).unwrap();
        let back = raw_to_json(&mut Cursor::new(&raw)).unwrap();
        assert_eq!(back, json);
    }

    #[test]
    fn path_link_normalises_slashes() {
        let mut out = Vec::new();
        write_path_link("/old", "new", &mut out).unwrap();
        assert_eq!(out, b"/old\n./new\n");
    }
}
