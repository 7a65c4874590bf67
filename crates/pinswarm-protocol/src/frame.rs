//! Line-oriented text frames exchanged with provider agents.
//!
//! Every inbound frame is parsed exactly once into a [`Frame`] before it is
//! routed to the registry, the heartbeat handler or a pending request.
//!
//! | Direction    | Frame                         | Meaning                          |
//! |--------------|-------------------------------|----------------------------------|
//! | agent → core | `id|<peerId>`                 | identity announcement            |
//! | core → agent | `ping`                        | liveness / RTT probe             |
//! | agent → core | `cids|<c1,c2,...>`            | probe reply with pinned set      |
//! | core → agent | `hb|<nonce>`                  | heartbeat keep-alive             |
//! | core → agent | `pin|<cid>` / `unpin|<cid>`   | replicate / drop content         |
//! | agent → core | `ok|pin|<cid>` / `err|pin|<cid>` | correlated outcome            |
//! | agent → core | `Success:...` / `Error:...`   | legacy uncorrelated outcome      |

use std::fmt;

use crate::error::ProtocolError;
use crate::types::{Cid, PeerId};

/// Request types that receive an outcome frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Pin,
    Unpin,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Pin => "pin",
            RequestKind::Unpin => "unpin",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded wire frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `id|<peerId>`, first frame of an agent connection.
    Identify(PeerId),
    /// `ping`
    Ping,
    /// `cids|<c1,c2,...>`
    Inventory(Vec<Cid>),
    /// `cids|error`, the agent could not list its pins.
    InventoryUnavailable,
    /// `hb|<nonce>` in either direction.
    Heartbeat(String),
    /// `pin|<cid>`
    Pin(Cid),
    /// `unpin|<cid>`
    Unpin(Cid),
    /// `ok|<kind>|<cid>` or `err|<kind>|<cid>[|<detail>]`
    Outcome {
        kind: RequestKind,
        cid: Cid,
        ok: bool,
        detail: Option<String>,
    },
    /// `Success:<detail>`
    LegacySuccess(String),
    /// `Error:<detail>`
    LegacyError(String),
    /// Anything else. Kept so the caller can log it.
    Unknown(String),
}

impl Frame {
    /// Decode a single text frame.
    pub fn parse(raw: &str) -> Result<Frame, ProtocolError> {
        let text = raw.trim_end_matches(['\r', '\n']);
        if text.trim().is_empty() {
            return Err(ProtocolError::EmptyFrame);
        }

        if text == "ping" {
            return Ok(Frame::Ping);
        }
        if let Some(detail) = text.strip_prefix("Success:") {
            return Ok(Frame::LegacySuccess(detail.trim().to_string()));
        }
        if let Some(detail) = text.strip_prefix("Error:") {
            return Ok(Frame::LegacyError(detail.trim().to_string()));
        }

        let (tag, rest) = match text.split_once('|') {
            Some(parts) => parts,
            None => return Ok(Frame::Unknown(text.to_string())),
        };

        match tag {
            "id" => non_empty(rest, "id").map(|p| Frame::Identify(PeerId::new(p))),
            "cids" => {
                if rest.trim() == "error" {
                    return Ok(Frame::InventoryUnavailable);
                }
                let cids = rest
                    .split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(Cid::new)
                    .collect();
                Ok(Frame::Inventory(cids))
            }
            "hb" => Ok(Frame::Heartbeat(rest.to_string())),
            "pin" => non_empty(rest, "pin").map(|c| Frame::Pin(Cid::new(c))),
            "unpin" => non_empty(rest, "unpin").map(|c| Frame::Unpin(Cid::new(c))),
            "ok" | "err" => parse_outcome(tag == "ok", rest, text),
            _ => Ok(Frame::Unknown(text.to_string())),
        }
    }

    /// Whether this frame reports the outcome of `kind` for `cid`.
    ///
    /// Returns `Some(true)` on success, `Some(false)` on failure and `None`
    /// when the frame is not an outcome for that request. Legacy
    /// `Success:`/`Error:` frames carry no CID and match any request.
    pub fn outcome_for(&self, kind: RequestKind, cid: &Cid) -> Option<bool> {
        match self {
            Frame::Outcome {
                kind: k,
                cid: c,
                ok,
                ..
            } if *k == kind && c == cid => Some(*ok),
            Frame::LegacySuccess(_) => Some(true),
            Frame::LegacyError(_) => Some(false),
            _ => None,
        }
    }

    /// Whether this frame answers a `ping` probe.
    pub fn is_probe_reply(&self) -> bool {
        matches!(self, Frame::Inventory(_) | Frame::InventoryUnavailable)
    }

    /// Short name used in log fields.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Frame::Identify(_) => "id",
            Frame::Ping => "ping",
            Frame::Inventory(_) | Frame::InventoryUnavailable => "cids",
            Frame::Heartbeat(_) => "hb",
            Frame::Pin(_) => "pin",
            Frame::Unpin(_) => "unpin",
            Frame::Outcome { .. } => "outcome",
            Frame::LegacySuccess(_) | Frame::LegacyError(_) => "legacy-outcome",
            Frame::Unknown(_) => "unknown",
        }
    }
}

fn non_empty<'a>(value: &'a str, kind: &'static str) -> Result<&'a str, ProtocolError> {
    let value = value.trim();
    if value.is_empty() || value.contains('|') {
        return Err(ProtocolError::MalformedFrame {
            kind,
            frame: value.to_string(),
        });
    }
    Ok(value)
}

fn parse_outcome(ok: bool, rest: &str, text: &str) -> Result<Frame, ProtocolError> {
    let mut parts = rest.splitn(3, '|');
    let kind = match parts.next() {
        Some("pin") => RequestKind::Pin,
        Some("unpin") => RequestKind::Unpin,
        _ => return Ok(Frame::Unknown(text.to_string())),
    };
    let cid = match parts.next().map(str::trim) {
        Some(c) if !c.is_empty() => Cid::new(c),
        _ => {
            return Err(ProtocolError::MalformedFrame {
                kind: "outcome",
                frame: text.to_string(),
            })
        }
    };
    let detail = parts
        .next()
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());
    Ok(Frame::Outcome {
        kind,
        cid,
        ok,
        detail,
    })
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Identify(peer) => write!(f, "id|{peer}"),
            Frame::Ping => f.write_str("ping"),
            Frame::Inventory(cids) => {
                let joined = cids.iter().map(Cid::as_str).collect::<Vec<_>>().join(",");
                write!(f, "cids|{joined}")
            }
            Frame::InventoryUnavailable => f.write_str("cids|error"),
            Frame::Heartbeat(nonce) => write!(f, "hb|{nonce}"),
            Frame::Pin(cid) => write!(f, "pin|{cid}"),
            Frame::Unpin(cid) => write!(f, "unpin|{cid}"),
            Frame::Outcome {
                kind,
                cid,
                ok,
                detail,
            } => {
                let tag = if *ok { "ok" } else { "err" };
                match detail {
                    Some(d) => write!(f, "{tag}|{kind}|{cid}|{d}"),
                    None => write!(f, "{tag}|{kind}|{cid}"),
                }
            }
            Frame::LegacySuccess(detail) => write!(f, "Success: {detail}"),
            Frame::LegacyError(detail) => write!(f, "Error: {detail}"),
            Frame::Unknown(raw) => f.write_str(raw),
        }
    }
}
