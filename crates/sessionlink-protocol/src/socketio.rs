//! Socket.IO v5 packets carried inside Engine.IO `message` packets.

use serde_json::Value;

use crate::{DEFAULT_NAMESPACE, PacketError, PacketResult};

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    /// Client request to join a namespace, or the server's acceptance
    /// (which carries `{"sid": ...}`).
    Connect {
        namespace: String,
        payload: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        namespace: String,
        id: u64,
        args: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        message: String,
    },
}

impl SocketPacket {
    /// Namespace join request, as sent by the client.
    pub fn connect(namespace: impl Into<String>) -> Self {
        SocketPacket::Connect {
            namespace: namespace.into(),
            payload: None,
        }
    }

    pub fn event(namespace: impl Into<String>, name: impl Into<String>, args: Vec<Value>) -> Self {
        SocketPacket::Event {
            namespace: namespace.into(),
            id: None,
            name: name.into(),
            args,
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            SocketPacket::Connect { namespace, .. }
            | SocketPacket::Disconnect { namespace }
            | SocketPacket::Event { namespace, .. }
            | SocketPacket::Ack { namespace, .. }
            | SocketPacket::ConnectError { namespace, .. } => namespace,
        }
    }

    /// Session id granted by the server on a successful namespace connect.
    pub fn sid(&self) -> Option<&str> {
        match self {
            SocketPacket::Connect {
                payload: Some(payload),
                ..
            } => payload.get("sid").and_then(Value::as_str),
            _ => None,
        }
    }

    pub fn decode(body: &str) -> PacketResult<Self> {
        let mut chars = body.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        let mut rest = chars.as_str();

        let namespace = if rest.starts_with('/') {
            match rest.find(',') {
                Some(idx) => {
                    let nsp = &rest[..idx];
                    rest = &rest[idx + 1..];
                    nsp.to_string()
                }
                None => {
                    let nsp = rest.to_string();
                    rest = "";
                    nsp
                }
            }
        } else {
            DEFAULT_NAMESPACE.to_string()
        };

        match kind {
            '0' => Ok(SocketPacket::Connect {
                namespace,
                payload: parse_optional(rest)?,
            }),
            '1' => Ok(SocketPacket::Disconnect { namespace }),
            '2' => {
                let (id, rest) = split_ack_id(rest);
                let mut args = parse_array(rest)?;
                if args.is_empty() {
                    return Err(PacketError::InvalidPayload("event without name".into()));
                }
                let name = match args.remove(0) {
                    Value::String(name) => name,
                    other => {
                        return Err(PacketError::InvalidPayload(format!(
                            "event name must be a string, got {other}"
                        )));
                    }
                };
                Ok(SocketPacket::Event {
                    namespace,
                    id,
                    name,
                    args,
                })
            }
            '3' => {
                let (id, rest) = split_ack_id(rest);
                let id = id.ok_or_else(|| PacketError::InvalidPayload("ack without id".into()))?;
                Ok(SocketPacket::Ack {
                    namespace,
                    id,
                    args: parse_array(rest)?,
                })
            }
            '4' => {
                let message = match parse_optional(rest)? {
                    Some(Value::Object(map)) => map
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("connect error")
                        .to_string(),
                    Some(Value::String(message)) => message,
                    _ => "connect error".to_string(),
                };
                Ok(SocketPacket::ConnectError { namespace, message })
            }
            '5' | '6' => Err(PacketError::Binary),
            other => Err(PacketError::UnknownType(other)),
        }
    }

    pub fn encode(&self) -> String {
        let (kind, namespace, id, data) = match self {
            SocketPacket::Connect { namespace, payload } => ('0', namespace, None, payload.clone()),
            SocketPacket::Disconnect { namespace } => ('1', namespace, None, None),
            SocketPacket::Event {
                namespace,
                id,
                name,
                args,
            } => {
                let mut items = Vec::with_capacity(args.len() + 1);
                items.push(Value::String(name.clone()));
                items.extend(args.iter().cloned());
                ('2', namespace, *id, Some(Value::Array(items)))
            }
            SocketPacket::Ack {
                namespace,
                id,
                args,
            } => ('3', namespace, Some(*id), Some(Value::Array(args.clone()))),
            SocketPacket::ConnectError { namespace, message } => (
                '4',
                namespace,
                None,
                Some(serde_json::json!({ "message": message })),
            ),
        };

        let mut out = String::new();
        out.push(kind);
        if namespace != DEFAULT_NAMESPACE {
            out.push_str(namespace);
            out.push(',');
        }
        if let Some(id) = id {
            out.push_str(&id.to_string());
        }
        if let Some(data) = data {
            out.push_str(&data.to_string());
        }
        out
    }
}

fn split_ack_id(rest: &str) -> (Option<u64>, &str) {
    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return (None, rest);
    }
    (rest[..digits].parse().ok(), &rest[digits..])
}

fn parse_optional(rest: &str) -> PacketResult<Option<Value>> {
    if rest.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(rest)
        .map(Some)
        .map_err(|e| PacketError::InvalidPayload(e.to_string()))
}

fn parse_array(rest: &str) -> PacketResult<Vec<Value>> {
    match parse_optional(rest)? {
        Some(Value::Array(items)) => Ok(items),
        None => Ok(Vec::new()),
        Some(other) => Err(PacketError::InvalidPayload(format!(
            "expected array, got {other}"
        ))),
    }
}
