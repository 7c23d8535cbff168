//! View attachment at chain entry.

use schnabel_types::{InputViews, NormalizedInput};

/// Attach seeded views when absent; idempotent otherwise.
#[must_use]
pub fn ensure_views(mut input: NormalizedInput) -> NormalizedInput {
    if input.views.is_none() {
        input.views = Some(InputViews::from_canonical(&input.canonical));
    }
    input
}
