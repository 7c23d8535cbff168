//! Request validation and normalization (L1).

use std::sync::Arc;

use schnabel_types::{
    AuditError, AuditRequest, CanonicalChunk, CanonicalInput, InputFeatures, LanguageHint,
    NormalizedInput, canonicalize,
};

/// Hard cap on the prompt, in bytes (1 MiB).
pub const MAX_PROMPT_BYTES: usize = 1 << 20;

/// Hard cap on the request id length, in characters.
pub const MAX_REQUEST_ID_CHARS: usize = 255;

/// Validate and normalize an [`AuditRequest`] into the working document.
///
/// Deterministic for equal inputs and idempotent: normalizing the preserved
/// `raw` request again yields the same canonical content. `max_prompt_length`
/// is the caller's character cap on top of the byte cap.
pub fn normalize(
    request: AuditRequest,
    max_prompt_length: Option<usize>,
) -> Result<NormalizedInput, AuditError> {
    if request.request_id.is_empty() {
        return Err(AuditError::invalid_request("requestId must not be empty"));
    }
    if request.request_id.chars().count() > MAX_REQUEST_ID_CHARS {
        return Err(AuditError::invalid_request(format!(
            "requestId exceeds {MAX_REQUEST_ID_CHARS} characters"
        )));
    }
    if !request.timestamp.is_finite() || request.timestamp < 0.0 {
        return Err(AuditError::invalid_request(
            "timestamp must be finite and non-negative",
        ));
    }
    if request.prompt.len() > MAX_PROMPT_BYTES {
        return Err(AuditError::invalid_request(format!(
            "prompt exceeds {MAX_PROMPT_BYTES} bytes"
        )));
    }
    if let Some(cap) = max_prompt_length
        && request.prompt.chars().count() > cap
    {
        return Err(AuditError::invalid_request(format!(
            "prompt exceeds maxPromptLength of {cap} characters"
        )));
    }

    let raw = Arc::new(request);

    let prompt = raw.prompt.trim().to_string();
    let prompt_chunks_canonical: Vec<CanonicalChunk> = raw
        .prompt_chunks
        .iter()
        .flatten()
        .filter_map(|chunk| {
            let text = chunk.text.trim();
            (!text.is_empty()).then(|| CanonicalChunk {
                source: chunk.source,
                text: text.to_string(),
            })
        })
        .collect();

    let tool_calls_json = canonical_list(&raw.tool_calls)?;
    let tool_results_json = canonical_list(&raw.tool_results)?;
    let response_text = raw
        .response_text
        .as_deref()
        .map(|text| text.trim().to_string());

    let mut tool_names: Vec<String> = raw
        .tool_calls
        .iter()
        .map(|call| call.tool_name.clone())
        .chain(raw.tool_results.iter().map(|result| result.tool_name.clone()))
        .collect();
    tool_names.sort_unstable();
    tool_names.dedup();

    let language_hint = detect_language(&prompt, &prompt_chunks_canonical);
    let prompt_length = prompt.chars().count();

    Ok(NormalizedInput {
        request_id: raw.request_id.clone(),
        canonical: CanonicalInput {
            prompt,
            prompt_chunks_canonical,
            tool_calls_json,
            tool_results_json,
            response_text,
        },
        features: InputFeatures {
            has_tool_calls: !raw.tool_calls.is_empty(),
            has_tool_results: !raw.tool_results.is_empty(),
            tool_names,
            language_hint,
            prompt_length,
        },
        views: None,
        raw,
    })
}

fn canonical_list<T: serde::Serialize>(list: &[T]) -> Result<String, AuditError> {
    let value = serde_json::to_value(list)
        .map_err(|err| AuditError::invalid_request(format!("unserializable tool data: {err}")))?;
    Ok(canonicalize(&value))
}

fn detect_language(prompt: &str, chunks: &[CanonicalChunk]) -> LanguageHint {
    let texts = std::iter::once(prompt).chain(chunks.iter().map(|chunk| chunk.text.as_str()));
    let mut has_ascii_alpha = false;
    for text in texts {
        for ch in text.chars() {
            if is_hangul(ch) {
                return LanguageHint::Ko;
            }
            has_ascii_alpha |= ch.is_ascii_alphabetic();
        }
    }
    if has_ascii_alpha {
        LanguageHint::En
    } else {
        LanguageHint::Unknown
    }
}

fn is_hangul(ch: char) -> bool {
    matches!(ch,
        '\u{AC00}'..='\u{D7AF}' | '\u{1100}'..='\u{11FF}' | '\u{3130}'..='\u{318F}')
}
