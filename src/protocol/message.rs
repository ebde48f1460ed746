use std::fmt;

use rmpv::Value;

use crate::{
    // ---
    IdGenerator,
    Result,
    RpcError,
};

/// Discriminant carried as the first element of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Request = 0,
    Response = 1,
    Notification = 2,
}

impl MessageType {
    // ---

    /// Number of positional elements, type tag included.
    pub const fn arity(self) -> usize {
        match self {
            MessageType::Request | MessageType::Response => 4,
            MessageType::Notification => 3,
        }
    }
}

impl TryFrom<u64> for MessageType {
    type Error = RpcError;

    fn try_from(tag: u64) -> Result<Self> {
        // ---
        match tag {
            0 => Ok(MessageType::Request),
            1 => Ok(MessageType::Response),
            2 => Ok(MessageType::Notification),
            other => Err(RpcError::Protocol(format!("unknown message type {other}"))),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::Notification => "notification",
        };
        f.write_str(name)
    }
}

/// A MessagePack-RPC message.
///
/// The wire form is a positional array; this type is the only place that
/// knows the layout:
///
/// ```text
/// Request       [0, id, method, params]
/// Response      [1, id, error, result]
/// Notification  [2, method, params]
/// ```
///
/// # Example
///
/// ```
/// use msgpack_rpc::{IdGenerator, Message, Value};
///
/// let ids = IdGenerator::new();
/// let (request, id) = Message::build_request(&ids, "echo", vec![Value::from(1)]);
///
/// let parsed = Message::parse(request.into_value()).unwrap();
/// assert_eq!(parsed.id(), Some(id));
/// assert_eq!(parsed.method(), Some("echo"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request {
        id: u32,
        method: String,
        params: Vec<Value>,
    },
    Response {
        id: u32,
        /// `None` on success. When `Some`, `result` carries no meaning.
        error: Option<String>,
        result: Value,
    },
    Notification {
        method: String,
        params: Vec<Value>,
    },
}

impl Message {
    // ---

    /// Build a request, allocating its correlation id from `ids`.
    ///
    /// Returns the message together with the id it carries.
    pub fn build_request(
        ids: &IdGenerator,
        method: impl Into<String>,
        params: Vec<Value>,
    ) -> (Self, u32) {
        // ---
        let id = ids.next();
        let msg = Message::Request {
            id,
            method: method.into(),
            params,
        };
        (msg, id)
    }

    /// Build a notification. No id is allocated.
    pub fn build_notification(method: impl Into<String>, params: Vec<Value>) -> Self {
        Message::Notification {
            method: method.into(),
            params,
        }
    }

    /// Build a response for request `id`.
    ///
    /// Any error is reduced to its display text: the wire only carries a
    /// string or nil in the error slot.
    pub fn build_response<E>(id: u32, error: Option<E>, result: Value) -> Self
    where
        E: fmt::Display,
    {
        // ---
        Message::Response {
            id,
            error: error.map(|e| e.to_string()),
            result,
        }
    }

    /// Successful response: nil error.
    pub fn success(id: u32, result: Value) -> Self {
        Message::Response {
            id,
            error: None,
            result,
        }
    }

    /// Failed response: error text, nil result.
    pub fn failure(id: u32, error: impl fmt::Display) -> Self {
        Message::Response {
            id,
            error: Some(error.to_string()),
            result: Value::Nil,
        }
    }

    /// Decode a frame into a message.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Protocol`] if the frame is not an array, carries an
    /// unknown type tag, has the wrong number of elements for its tag, or a
    /// positional element has the wrong type.
    pub fn parse(value: Value) -> Result<Self> {
        // ---
        let fields = match value {
            Value::Array(fields) => fields,
            other => {
                return Err(RpcError::Protocol(format!(
                    "expected array frame, got {other}"
                )))
            }
        };

        let tag = fields
            .first()
            .and_then(Value::as_u64)
            .ok_or_else(|| RpcError::Protocol("missing or non-integer type tag".into()))?;
        let kind = MessageType::try_from(tag)?;

        if fields.len() != kind.arity() {
            return Err(RpcError::Protocol(format!(
                "{kind} frame has {} elements, expected {}",
                fields.len(),
                kind.arity()
            )));
        }

        match kind {
            MessageType::Request => {
                let [_, id, method, params]: [Value; 4] = into_fields(fields)?;
                Ok(Message::Request {
                    id: parse_id(id)?,
                    method: parse_method(method)?,
                    params: parse_params(params)?,
                })
            }
            MessageType::Response => {
                let [_, id, error, result]: [Value; 4] = into_fields(fields)?;
                Ok(Message::Response {
                    id: parse_id(id)?,
                    error: parse_error(error),
                    result,
                })
            }
            MessageType::Notification => {
                let [_, method, params]: [Value; 3] = into_fields(fields)?;
                Ok(Message::Notification {
                    method: parse_method(method)?,
                    params: parse_params(params)?,
                })
            }
        }
    }

    /// Encode into the positional wire array.
    pub fn into_value(self) -> Value {
        // ---
        match self {
            Message::Request { id, method, params } => Value::Array(vec![
                Value::from(MessageType::Request as u8),
                Value::from(id),
                Value::from(method),
                Value::Array(params),
            ]),
            Message::Response { id, error, result } => Value::Array(vec![
                Value::from(MessageType::Response as u8),
                Value::from(id),
                error.map(Value::from).unwrap_or(Value::Nil),
                result,
            ]),
            Message::Notification { method, params } => Value::Array(vec![
                Value::from(MessageType::Notification as u8),
                Value::from(method),
                Value::Array(params),
            ]),
        }
    }

    pub fn kind(&self) -> MessageType {
        match self {
            Message::Request { .. } => MessageType::Request,
            Message::Response { .. } => MessageType::Response,
            Message::Notification { .. } => MessageType::Notification,
        }
    }

    /// Correlation id, absent on notifications.
    pub fn id(&self) -> Option<u32> {
        match self {
            Message::Request { id, .. } | Message::Response { id, .. } => Some(*id),
            Message::Notification { .. } => None,
        }
    }

    /// Method name, absent on responses.
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request { method, .. } | Message::Notification { method, .. } => {
                Some(method)
            }
            Message::Response { .. } => None,
        }
    }
}

impl From<Message> for Value {
    fn from(msg: Message) -> Self {
        msg.into_value()
    }
}

impl TryFrom<Value> for Message {
    type Error = RpcError;

    fn try_from(value: Value) -> Result<Self> {
        Message::parse(value)
    }
}

fn into_fields<const N: usize>(fields: Vec<Value>) -> Result<[Value; N]> {
    fields
        .try_into()
        .map_err(|v: Vec<Value>| RpcError::Protocol(format!("expected {N} elements, got {}", v.len())))
}

fn parse_id(value: Value) -> Result<u32> {
    // ---
    value
        .as_u64()
        .and_then(|id| u32::try_from(id).ok())
        .ok_or_else(|| RpcError::Protocol(format!("message id {value} is not a uint32")))
}

fn parse_method(value: Value) -> Result<String> {
    // ---
    match value {
        Value::String(s) => s
            .into_str()
            .ok_or_else(|| RpcError::Protocol("method name is not valid UTF-8".into())),
        other => Err(RpcError::Protocol(format!(
            "method name must be a string, got {other}"
        ))),
    }
}

fn parse_params(value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(params) => Ok(params),
        other => Err(RpcError::Protocol(format!(
            "params must be an array, got {other}"
        ))),
    }
}

// Peers that send structured errors still get their error surfaced, as text.
fn parse_error(value: Value) -> Option<String> {
    // ---
    match value {
        Value::Nil => None,
        Value::String(s) => Some(match s.into_str() {
            Some(text) => text,
            None => String::from("<invalid utf-8 error>"),
        }),
        other => Some(other.to_string()),
    }
}
