//! Local answer synthesis.
//!
//! Builds the deterministic `TalkResult` for a request token from two static
//! tables. Bad tokens are not errors: anything that is not a valid index is
//! answered as index 0.

use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;

use crate::proto::{ResultType, TalkResponse, TalkResult};

/// Greetings, indexed by request token.
pub static GREETINGS: [&str; 6] = ["Hello", "Bonjour", "Hola", "こんにちは", "Ciao", "안녕하세요"];

/// Thanks matching each greeting.
pub static THANKS: [&str; 6] = [
    "Thank you very much",
    "Merci beaucoup",
    "Muchas Gracias",
    "どうも ありがとう ございます",
    "Mille Grazie",
    "대단히 감사합니다",
];

/// Language tag this node stamps on synthesized results.
pub const META_TAG: &str = "RUST";

/// Status carried by a normal answer.
pub const STATUS_OK: i32 = 200;

/// Status carried by an answer produced after an internal fault.
pub const STATUS_INTERNAL: i32 = 500;

/// Table index for a token; unparsable or out-of-range tokens map to 0.
pub fn index_of(token: &str) -> usize {
    match token.trim().parse::<usize>() {
        Ok(index) if index < GREETINGS.len() => index,
        _ => 0,
    }
}

/// Build the result for one token.
pub fn synthesize(token: &str) -> TalkResult {
    let index = index_of(token);
    let kv = HashMap::from([
        ("id".to_string(), Uuid::new_v4().to_string()),
        ("idx".to_string(), token.to_string()),
        ("data".to_string(), format!("{},{}", GREETINGS[index], THANKS[index])),
        ("meta".to_string(), META_TAG.to_string()),
    ]);

    TalkResult {
        id: Utc::now().timestamp_millis(),
        r#type: ResultType::Ok as i32,
        kv,
    }
}

/// A status-200 response holding one result per token, in order.
pub fn answer<'a, I>(tokens: I) -> TalkResponse
where
    I: IntoIterator<Item = &'a str>,
{
    TalkResponse {
        status: STATUS_OK,
        results: tokens.into_iter().map(synthesize).collect(),
    }
}

/// The answer given when a call could not be processed.
pub fn internal_fault() -> TalkResponse {
    TalkResponse {
        status: STATUS_INTERNAL,
        results: Vec::new(),
    }
}

/// Split a server-streaming request's data into its tokens.
pub fn tokens(data: &str) -> Vec<String> {
    data.split(',').map(str::to_string).collect()
}
