//! # Payload Batching
//!
//! Splits telemetry payloads into transmission-safe pieces two ways: a
//! count-based chunker for line protocols with a per-request line cap, and a
//! byte-bounded batcher that bisects the item list until every encoded batch
//! fits under the request ceiling.

use serde::Serialize;
use tracing::warn;

use crate::error::{CollectorError, Result};

/// Yield successive `chunk_size`-sized slices of `items`; the final chunk
/// holds the remainder. 1400 items at chunk size 1000 produce chunks of 1000
/// and 400.
pub fn divide_into_chunks<T>(items: &[T], chunk_size: usize) -> impl Iterator<Item = &[T]> {
    items.chunks(chunk_size.max(1))
}

/// How a batch of items is rendered into one request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding<'a> {
    /// Items joined with a separator, e.g. newline-joined metric lines.
    Separated(&'a str),
    /// Items rendered as one JSON array.
    JsonArray,
}

/// An already-encoded request body no larger than the configured ceiling
/// (except for the documented single-oversized-item pass-through).
pub type Batch = String;

/// Split `items` into encoded batches of at most `max_request_size` bytes.
///
/// The item list is encoded whole; while the encoding exceeds the ceiling
/// the list is split exactly in half by count and each half is encoded
/// independently, which keeps recursion depth logarithmic for roughly
/// uniform item sizes and preserves item order across the yielded batches.
/// An empty input yields no batches.
///
/// A single item whose encoding alone exceeds the ceiling is yielded as-is
/// with a warning: dropping telemetry is worse than one oversized request
/// the transport can still reject, and passing it through keeps the
/// recursion bounded.
pub fn divide_into_batches<T: Serialize>(
    items: &[T],
    max_request_size: usize,
    separator: Option<&str>,
) -> Result<Vec<Batch>> {
    let encoded: Vec<String> = match separator {
        // Separator-joined items are rendered raw, not JSON-quoted.
        Some(_) => items
            .iter()
            .map(|item| {
                serde_json::to_value(item)
                    .map_err(|e| CollectorError::Validation(format!("unencodable item: {e}")))
                    .map(|value| match value {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    })
            })
            .collect::<Result<_>>()?,
        None => items
            .iter()
            .map(|item| {
                serde_json::to_string(item)
                    .map_err(|e| CollectorError::Validation(format!("unencodable item: {e}")))
            })
            .collect::<Result<_>>()?,
    };

    let encoding = match separator {
        Some(sep) => Encoding::Separated(sep),
        None => Encoding::JsonArray,
    };

    let mut batches = Vec::new();
    bisect(&encoded, max_request_size, encoding, &mut batches);
    Ok(batches)
}

fn bisect(items: &[String], max: usize, encoding: Encoding<'_>, out: &mut Vec<Batch>) {
    if items.is_empty() {
        return;
    }

    if encoded_size(items, encoding) <= max {
        out.push(render(items, encoding));
        return;
    }

    if items.len() == 1 {
        warn!(
            size = encoded_size(items, encoding),
            max_request_size = max,
            "single item exceeds the batch size ceiling, passing through"
        );
        out.push(render(items, encoding));
        return;
    }

    let (left, right) = items.split_at(items.len() / 2);
    bisect(left, max, encoding, out);
    bisect(right, max, encoding, out);
}

fn encoded_size(items: &[String], encoding: Encoding<'_>) -> usize {
    let content: usize = items.iter().map(String::len).sum();
    match encoding {
        Encoding::Separated(sep) => content + sep.len() * items.len().saturating_sub(1),
        // Brackets plus a comma between every pair of items.
        Encoding::JsonArray => content + 2 + items.len().saturating_sub(1),
    }
}

fn render(items: &[String], encoding: Encoding<'_>) -> Batch {
    match encoding {
        Encoding::Separated(sep) => items.join(sep),
        Encoding::JsonArray => format!("[{}]", items.join(",")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::limits::{MAX_LOG_REQUEST_SIZE, MAX_METRIC_REQUEST_SIZE};

    #[test]
    fn empty_input_yields_no_chunks_or_batches() {
        let empty: Vec<String> = Vec::new();
        assert_eq!(divide_into_chunks(&empty, 1000).count(), 0);
        let batches = divide_into_batches(&empty, MAX_METRIC_REQUEST_SIZE, Some("\n")).unwrap();
        assert!(batches.is_empty());
    }

    #[test]
    fn chunker_splits_1400_items_into_1000_and_400() {
        let lines = vec!["line"; 1400];
        let chunks: Vec<_> = divide_into_chunks(&lines, 1000).collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 1000);
        assert_eq!(chunks[1].len(), 400);
    }

    #[test]
    fn fitting_payload_yields_one_batch_equal_to_full_encoding() {
        let lines: Vec<String> = (0..100).map(|i| format!("my.metric,dim=\"d\" gauge,{i}")).collect();
        let batches = divide_into_batches(&lines, MAX_METRIC_REQUEST_SIZE, Some("\n")).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0], lines.join("\n"));
    }

    #[test]
    fn uniform_oversize_payload_splits_into_equal_halves() {
        // 50_000 lines of 23 bytes exceed the 1 MB metric ceiling once, so
        // exactly one bisection happens and both halves are equal.
        let lines = vec!["my.metric,dim=\"dim\" 10".to_string(); 50_000];
        let batches = divide_into_batches(&lines, MAX_METRIC_REQUEST_SIZE, Some("\n")).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), batches[1].len());
        assert!(batches.iter().all(|b| b.len() <= MAX_METRIC_REQUEST_SIZE));
    }

    #[test]
    fn order_is_preserved_across_batches() {
        let lines: Vec<String> = (0..10_000).map(|i| format!("metric.{i:05} gauge,1")).collect();
        let batches = divide_into_batches(&lines, 10_000, Some("\n")).unwrap();
        let rejoined: Vec<String> = batches
            .iter()
            .flat_map(|batch| batch.split('\n').map(str::to_string))
            .collect();
        assert_eq!(rejoined, lines);
    }

    #[test]
    fn json_batches_are_valid_json_arrays() {
        let events: Vec<serde_json::Value> = (0..5000)
            .map(|i| serde_json::json!({"content": format!("event {i}"), "n": i}))
            .collect();
        let batches = divide_into_batches(&events, 100_000, None).unwrap();
        assert!(batches.len() > 1);
        let mut total = 0usize;
        for batch in &batches {
            assert!(batch.len() <= 100_000);
            let parsed: Vec<serde_json::Value> = serde_json::from_str(batch).unwrap();
            total += parsed.len();
        }
        assert_eq!(total, events.len());
    }

    #[test]
    fn oversized_single_item_is_passed_through() {
        let lines = vec!["x".repeat(2000)];
        let batches = divide_into_batches(&lines, 100, Some("\n")).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2000);
    }

    #[test]
    fn log_ceiling_accepts_small_event_lists() {
        let events: Vec<serde_json::Value> = (0..10)
            .map(|i| serde_json::json!({"attribute": i}))
            .collect();
        let batches = divide_into_batches(&events, MAX_LOG_REQUEST_SIZE, None).unwrap();
        assert_eq!(batches.len(), 1);
        serde_json::from_str::<Vec<serde_json::Value>>(&batches[0]).unwrap();
    }
}
