//! The recovery stream: a resumable checkpoint of an in-progress send.
//!
//! Layout is three decimal header lines (`type`, `maxTreeDepth`,
//! `savedTreeDepth`) followed by the raw bytes of the suspended level. The
//! body is opaque here; only the send pipeline interprets it.

use std::io::{BufRead, Write};

use crate::error::{Error, Result};

/// A suspended send, ready to be resumed at `saved_depth`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovery {
    /// Declared file type of the interrupted send.
    pub cw_type: u16,
    /// Maximum tree depth the send ran with; `None` = unlimited.
    pub max_tree_depth: Option<u32>,
    /// Tree depth the surviving bytes belong to.
    pub saved_depth: u32,
    /// The untransmitted remainder of that level.
    pub body: Vec<u8>,
}

impl Recovery {
    /// Serializes header lines and body to `out`.
    pub fn write(&self, out: &mut dyn Write) -> Result<()> {
        let max_depth = match self.max_tree_depth {
            Some(d) => d as i64,
            None => -1,
        };
        write!(out, "{}\n{}\n{}\n", self.cw_type, max_depth, self.saved_depth)
            .and_then(|()| out.write_all(&self.body))
            .map_err(Error::Write)
    }

    /// Parses a recovery stream back into its parts.
    pub fn read(input: &mut dyn BufRead) -> Result<Self> {
        let cw_type = read_decimal_line(input)? as u16;
        let max_depth = read_decimal_line(input)?;
        let saved_depth = read_decimal_line(input)? as u32;

        let mut body = Vec::new();
        input
            .read_to_end(&mut body)
            .map_err(|e| Error::Sys(format!("failed reading recovery body: {e}")))?;

        Ok(Recovery {
            cw_type,
            max_tree_depth: if max_depth < 0 {
                None
            } else {
                Some(max_depth as u32)
            },
            saved_depth,
            body,
        })
    }
}

fn read_decimal_line(input: &mut dyn BufRead) -> Result<i64> {
    let mut line = String::new();
    let n = input
        .read_line(&mut line)
        .map_err(|e| Error::Sys(format!("failed reading recovery header: {e}")))?;
    if n == 0 {
        return Err(Error::Sys("recovery stream header is truncated".into()));
    }
    line.trim()
        .parse()
        .map_err(|_| Error::Sys(format!("invalid recovery header line: {line:?}")))
}
