//! Enrich stage: the UTS#39 skeleton view.

use schnabel_types::{AuditError, FindingKind, InputViews, NormalizedInput};

use crate::confusables::confusables_table;
use crate::{ScanFut, Scanner, ScannerOutput};

pub(crate) const NAME: &str = "uts39_skeleton";

/// Writes `views.*.skeleton = skeletonize(views.*.revealed)` for every
/// target. Emits no findings; the confusables detector consumes the view.
#[derive(Debug, Default, Clone, Copy)]
pub struct SkeletonEnrich;

impl SkeletonEnrich {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn execute(&self, input: &NormalizedInput) -> Result<ScannerOutput, AuditError> {
        let table = confusables_table()?;
        let mut updated = input.clone();
        if updated.views.is_none() {
            updated.views = Some(InputViews::from_canonical(&updated.canonical));
        }
        if let Some(views) = updated.views.as_mut() {
            views.prompt.skeleton = table.skeletonize(&views.prompt.revealed);
            for chunk in &mut views.chunks {
                chunk.views.skeleton = table.skeletonize(&chunk.views.revealed);
            }
            if let Some(response) = views.response.as_mut() {
                response.skeleton = table.skeletonize(&response.revealed);
            }
        }
        Ok(ScannerOutput::unchanged(updated))
    }
}

impl Scanner for SkeletonEnrich {
    fn name(&self) -> &'static str {
        NAME
    }

    fn kind(&self) -> FindingKind {
        FindingKind::Enrich
    }

    fn run<'a>(&'a self, input: &'a NormalizedInput) -> ScanFut<'a> {
        Box::pin(async move { self.execute(input) })
    }
}
