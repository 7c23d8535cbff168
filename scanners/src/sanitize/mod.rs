//! Sanitize scanners.
//!
//! All sanitize stages follow one contract: `views.*.raw` never changes,
//! `sanitized`/`revealed` may be rewritten, and `canonical.prompt` /
//! `canonical.promptChunksCanonical` are updated to the most informative view
//! (revealed) so detectors that do not consult views still benefit.
//! `features.promptLength` is recomputed after any canonical update.

pub mod hidden_tags;
pub mod separators;
pub mod tool_args;
pub mod unicode;

use schnabel_types::{InputViews, NormalizedInput, ViewSet};

use crate::TargetMeta;

/// Run a view transformation over prompt, chunks, and response in order.
/// Attaches seeded views first when the chain has not done so.
pub(crate) fn for_each_target<F>(input: &mut NormalizedInput, mut apply: F)
where
    F: FnMut(TargetMeta, &mut ViewSet),
{
    if input.views.is_none() {
        input.views = Some(InputViews::from_canonical(&input.canonical));
    }
    let Some(views) = input.views.as_mut() else {
        return;
    };
    apply(TargetMeta::Prompt, &mut views.prompt);
    for (index, chunk) in views.chunks.iter_mut().enumerate() {
        apply(
            TargetMeta::Chunk {
                index,
                source: chunk.source,
            },
            &mut chunk.views,
        );
    }
    if let Some(response) = views.response.as_mut() {
        apply(TargetMeta::Response, response);
    }
}

/// Propagate the revealed views back into the canonical text and refresh the
/// prompt-length feature.
pub(crate) fn propagate_canonical(input: &mut NormalizedInput) {
    let Some(views) = &input.views else {
        return;
    };
    input.canonical.prompt = views.prompt.revealed.clone();
    for (chunk, chunk_views) in input
        .canonical
        .prompt_chunks_canonical
        .iter_mut()
        .zip(&views.chunks)
    {
        chunk.text = chunk_views.views.revealed.clone();
    }
    if let (Some(text), Some(response)) = (&mut input.canonical.response_text, &views.response) {
        *text = response.revealed.clone();
    }
    input.refresh_prompt_length();
}
