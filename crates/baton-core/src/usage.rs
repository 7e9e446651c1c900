//! Token and request accounting.

use std::ops::AddAssign;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputTokensDetails {
    pub cached_tokens: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputTokensDetails {
    pub reasoning_tokens: u64,
}

/// Token counts of a single model request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    #[serde(default)]
    pub input_tokens_details: InputTokensDetails,
    #[serde(default)]
    pub output_tokens_details: OutputTokensDetails,
}

/// Cumulative usage across one or more model requests.
///
/// `request_usage_entries` keeps per-request token counts in call order so
/// pricing that depends on the size of each individual request can still be
/// computed after usage has been merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub requests: u64,
    pub input_tokens: u64,
    #[serde(default)]
    pub input_tokens_details: InputTokensDetails,
    pub output_tokens: u64,
    #[serde(default)]
    pub output_tokens_details: OutputTokensDetails,
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request_usage_entries: Vec<RequestUsage>,
}

impl Usage {
    /// Usage of a single completed request.
    pub fn single_request(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            requests: 1,
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            ..Default::default()
        }
    }

    /// Fold `other` into `self`.
    ///
    /// Scalar counters are summed. If `other` is exactly one request with a
    /// non-zero token total it contributes one new `RequestUsage` entry;
    /// otherwise its own entries are appended as-is.
    pub fn add(&mut self, other: &Usage) {
        self.requests += other.requests;
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
        self.input_tokens_details.cached_tokens += other.input_tokens_details.cached_tokens;
        self.output_tokens_details.reasoning_tokens +=
            other.output_tokens_details.reasoning_tokens;

        if other.requests == 1 && other.total_tokens > 0 {
            self.request_usage_entries.push(RequestUsage {
                input_tokens: other.input_tokens,
                output_tokens: other.output_tokens,
                total_tokens: other.total_tokens,
                input_tokens_details: other.input_tokens_details,
                output_tokens_details: other.output_tokens_details,
            });
        } else {
            self.request_usage_entries
                .extend(other.request_usage_entries.iter().cloned());
        }
    }
}

impl AddAssign<&Usage> for Usage {
    fn add_assign(&mut self, rhs: &Usage) {
        self.add(rhs);
    }
}
