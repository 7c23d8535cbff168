//! Builders for scanner unit tests.

use std::sync::Arc;

use schnabel_types::{
    Actor, AuditRequest, CanonicalChunk, CanonicalInput, ChunkSource, InputFeatures, InputViews,
    LanguageHint, NormalizedInput, PromptChunk, canonicalize,
};

pub(crate) fn doc_from_request(request: AuditRequest) -> NormalizedInput {
    let raw = Arc::new(request);
    let canonical = CanonicalInput {
        prompt: raw.prompt.trim().to_string(),
        prompt_chunks_canonical: raw
            .prompt_chunks
            .iter()
            .flatten()
            .filter(|chunk| !chunk.text.trim().is_empty())
            .map(|chunk| CanonicalChunk {
                source: chunk.source,
                text: chunk.text.trim().to_string(),
            })
            .collect(),
        tool_calls_json: canonicalize(&serde_json::to_value(&raw.tool_calls).expect("serializes")),
        tool_results_json: canonicalize(
            &serde_json::to_value(&raw.tool_results).expect("serializes"),
        ),
        response_text: raw.response_text.as_ref().map(|text| text.trim().to_string()),
    };
    let prompt_length = canonical.prompt.chars().count();
    let views = InputViews::from_canonical(&canonical);
    NormalizedInput {
        request_id: raw.request_id.clone(),
        canonical,
        features: InputFeatures {
            has_tool_calls: !raw.tool_calls.is_empty(),
            has_tool_results: !raw.tool_results.is_empty(),
            tool_names: Vec::new(),
            language_hint: LanguageHint::Unknown,
            prompt_length,
        },
        views: Some(views),
        raw,
    }
}

pub(crate) fn doc_with_prompt(prompt: &str) -> NormalizedInput {
    doc_from_request(AuditRequest::new("req-test", 1_000.0, prompt))
}

pub(crate) fn doc_with_chunk(source: ChunkSource, text: &str) -> NormalizedInput {
    let mut request = AuditRequest::new("req-test", 1_000.0, "prompt text");
    request.prompt_chunks = Some(vec![PromptChunk::new(source, text)]);
    doc_from_request(request)
}

pub(crate) fn doc_with_response(prompt: &str, response: &str) -> NormalizedInput {
    let mut request = AuditRequest::new("req-test", 1_000.0, prompt);
    request.response_text = Some(response.to_string());
    doc_from_request(request)
}

pub(crate) fn doc_with_session(request_id: &str, session: &str, response: &str) -> NormalizedInput {
    let mut request = AuditRequest::new(request_id, 1_000.0, "prompt text");
    request.actor = Some(Actor {
        user_id: None,
        session_id: Some(session.to_string()),
        ip: None,
    });
    request.response_text = Some(response.to_string());
    doc_from_request(request)
}
