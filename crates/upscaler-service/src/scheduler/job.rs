use std::cmp::Ordering;
use std::path::PathBuf;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::UpscaleError;
use crate::utils::natsort::natural_cmp;

/// Hints about where an image belongs, used to decide which image to upscale next.
///
/// Readers request the pages of a chapter in a burst, and the pages they look at first should
/// be upscaled first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PriorityHints {
    /// The group an image belongs to, e.g. a chapter number.
    pub group: Option<String>,
    /// The position within the group, e.g. a page number.
    pub sequence: Option<String>,
}

impl PriorityHints {
    pub fn new(group: impl Into<String>, sequence: impl Into<String>) -> Self {
        Self {
            group: Some(group.into()),
            sequence: Some(sequence.into()),
        }
    }
}

/// Compares two optional labels. A missing label comes first.
fn label_cmp(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => natural_cmp(a, b),
    }
}

/// The order in which jobs are upscaled. [`Ordering::Less`] means `a` runs before `b`.
///
/// Jobs without a group come before all grouped jobs, since those are images a reader is
/// looking at right now rather than prefetched pages. Groups, then sequences, then URLs are
/// compared in natural order.
pub fn execution_order(
    (a_hints, a_url): (&PriorityHints, &str),
    (b_hints, b_url): (&PriorityHints, &str),
) -> Ordering {
    label_cmp(a_hints.group.as_deref(), b_hints.group.as_deref())
        .then_with(|| label_cmp(a_hints.sequence.as_deref(), b_hints.sequence.as_deref()))
        .then_with(|| natural_cmp(a_url, b_url))
}

/// An image waiting to be upscaled.
///
/// The original has already been downloaded to `input`.
#[derive(Debug)]
pub struct UpscaleJob {
    pub url: String,
    pub input: PathBuf,
    pub output: PathBuf,
    pub hints: PriorityHints,
    pub(super) queued_at: Instant,
    pub(super) result: oneshot::Sender<Result<(), UpscaleError>>,
}

impl UpscaleJob {
    /// Resolves the job. The result can only be delivered once.
    pub(super) fn respond(self, result: Result<(), UpscaleError>) {
        // The submitter may have stopped waiting due to shutdown.
        self.result.send(result).ok();
    }
}

// `BinaryHeap` pops the greatest element, which has to be the job that runs next.
impl Ord for UpscaleJob {
    fn cmp(&self, other: &Self) -> Ordering {
        execution_order((&self.hints, &self.url), (&other.hints, &other.url)).reverse()
    }
}

impl PartialOrd for UpscaleJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for UpscaleJob {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for UpscaleJob {}
