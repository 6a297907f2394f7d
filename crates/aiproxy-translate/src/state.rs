use std::collections::HashMap;

/// Cross-chunk accumulator for one streaming translation.
///
/// A single struct shared by every direction; each state machine uses the
/// fields it needs. Created once per stream by the executor and threaded
/// through every [`crate::translate_stream`] call.
#[derive(Debug, Default)]
pub struct StreamState {
    /// Synthesized response id for formats that need a stable one.
    pub response_id: String,
    /// Unix seconds stamped on the first chunk.
    pub created_at: i64,
    /// Whether the client has been sent its stream preamble
    /// (`message_start`, `response.created`, first role delta, …).
    pub started: bool,
    /// Whether the terminal block has been emitted.
    pub finished: bool,

    /// Index of the currently open content block on the client side.
    pub block_index: i64,
    /// Kind of the currently open block ("text", "thinking", "tool_use").
    pub open_block: Option<String>,

    /// Tool-call bookkeeping: upstream block/choice index -> client id,
    /// client-side index, accumulated argument text.
    pub tool_ids: HashMap<i64, String>,
    pub tool_indexes: HashMap<i64, i64>,
    pub tool_names: HashMap<i64, String>,
    pub tool_args: HashMap<i64, String>,
    /// Next tool index for formats that do not number tool calls.
    pub tool_count: i64,

    /// Accumulated thinking text (feeds the signature cache).
    pub thinking_text: String,
    /// Signature observed on thinking chunks, if any.
    pub thinking_signature: String,

    /// Usage totals observed so far; merged into the terminal chunk.
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cached_tokens: i64,
    /// Finish/stop reason in the upstream vocabulary.
    pub finish_reason: String,

    /// Responses-API output item counter.
    pub output_index: i64,
    /// Raw accumulated text (Responses `output_text.done`, Claude collectors).
    pub text: String,
}

impl StreamState {
    pub fn ensure_identity(&mut self, prefix: &str) {
        if self.response_id.is_empty() {
            self.response_id = format!("{prefix}{}", uuid::Uuid::new_v4().simple());
        }
        if self.created_at == 0 {
            self.created_at = time::OffsetDateTime::now_utc().unix_timestamp();
        }
    }
}
