//! Single pairwise comparison against a vision-language collaborator (C3,
//! §4.3).

use ibeam_core::{Choice, IbeamError, Result, Verdict, VisionComparator};

/// Wraps a [`VisionComparator`] with structural verdict validation.
pub struct PairwiseRanker<'a> {
    comparator: &'a dyn VisionComparator,
}

impl<'a> PairwiseRanker<'a> {
    /// Build a ranker over `comparator`.
    #[must_use]
    pub fn new(comparator: &'a dyn VisionComparator) -> Self {
        Self { comparator }
    }

    /// Compare `image_a_ref` against `image_b_ref` for `prompt`.
    ///
    /// The verdict is trusted as-is except for one check: `choice` and
    /// `ranks` must not disagree about which operand is better (§4.3 "the
    /// ranker must reject verdicts whose choice and ranks disagree on
    /// orientation"). A disagreement is reported as [`IbeamError::MalformedVerdict`].
    pub async fn compare(
        &self,
        image_a_ref: &str,
        image_b_ref: &str,
        prompt: &str,
    ) -> Result<Verdict> {
        let verdict = self.comparator.compare(image_a_ref, image_b_ref, prompt).await?;
        if !verdict.is_structurally_valid() {
            return Err(IbeamError::MalformedVerdict(format!(
                "choice {:?} disagrees with reported ranks (a: {:?}, b: {:?})",
                verdict.choice, verdict.ranks_a, verdict.ranks_b
            )));
        }
        Ok(verdict)
    }
}

/// Swap the two operands of a verdict in place: ranks are exchanged and
/// `choice` is flipped (`A <-> B`, `Tie` unchanged). Everything else
/// (explanation, confidence, strengths/weaknesses, suggestion) describes
/// "the winner"/"the loser" generically and needs no adjustment.
pub(crate) fn invert_operands(mut verdict: Verdict) -> Verdict {
    std::mem::swap(&mut verdict.ranks_a, &mut verdict.ranks_b);
    verdict.choice = match verdict.choice {
        Choice::A => Choice::B,
        Choice::B => Choice::A,
        Choice::Tie => Choice::Tie,
    };
    verdict
}
