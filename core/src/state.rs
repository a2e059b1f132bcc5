use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::jobs::{CalloutJob, LayoutJob, MetadataJob, TilesJob};
use crate::paths::sheet_index;
use crate::tenancy::TenantKey;

/// `status` is monotone in this order; `failed` absorbs from any non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    ImageGeneration,
    MetadataExtraction,
    ParallelDetection,
    TileGeneration,
    Complete,
    Failed,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Complete | Status::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorState {
    pub tenant: TenantKey,
    pub total_sheets: u32,
    pub created_at: i64,
    pub timeout_ms: i64,
    pub status: Status,
    pub generated_images: HashSet<String>,
    pub extracted_metadata: HashSet<String>,
    pub valid_sheets: HashSet<String>,
    pub sheet_number_map: BTreeMap<String, String>,
    pub detected_callouts: HashSet<String>,
    pub detected_layouts: HashSet<String>,
    pub generated_tiles: HashSet<String>,
    pub last_error: Option<String>,
}

/// Per-stage `{completed, total}` pair, as reported by `getProgress`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StageProgress {
    pub completed: u32,
    pub total: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub image_generation: StageProgress,
    pub metadata_extraction: StageProgress,
    pub callout_detection: StageProgress,
    pub layout_detection: StageProgress,
    pub tile_generation: StageProgress,
}

impl Progress {
    /// Percentage for `planProcessingProgress`: each stage is worth an equal
    /// 20 points, so a stage whose `total` is not yet known (the detection and
    /// tiling stages before `validSheets` is determined) contributes 0 rather
    /// than pulling the pooled ratio down once it becomes known. At `complete`
    /// every stage is worth its full 20 regardless of `total`, which is what
    /// makes the zero-`totalSheets` and zero-`validSheets` plans reach exactly
    /// 100. This keeps the sequence non-decreasing across stage boundaries,
    /// unlike a ratio pooled over all five stages' `completed`/`total` sums.
    pub fn percent(&self, status: Status) -> u32 {
        let stages = [
            self.image_generation,
            self.metadata_extraction,
            self.callout_detection,
            self.layout_detection,
            self.tile_generation,
        ];
        let complete = status == Status::Complete;
        stages
            .iter()
            .map(|s| {
                if complete {
                    20
                } else if s.total == 0 {
                    0
                } else {
                    ((s.completed as u64 * 20) / s.total as u64) as u32
                }
            })
            .sum()
    }
}

/// Error raised by `initialize` when a plan already exists with a differing `totalSheets`.
#[derive(Debug)]
pub struct AlreadyInitialized {
    pub existing: u32,
    pub requested: u32,
}

impl std::fmt::Display for AlreadyInitialized {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "plan already initialized with totalSheets={}, got {}",
            self.existing, self.requested
        )
    }
}

impl std::error::Error for AlreadyInitialized {}

/// Effects a coordinator operation asks the caller to carry out: dispatch jobs,
/// emit events. The state machine itself never touches the queue or event log.
#[derive(Debug, Default)]
pub struct Effects {
    pub metadata_jobs: Vec<MetadataJob>,
    pub callout_jobs: Vec<CalloutJob>,
    pub layout_jobs: Vec<LayoutJob>,
    pub tiles_jobs: Vec<TilesJob>,
    pub metadata_completed: bool,
    pub processing_completed: bool,
}

impl CoordinatorState {
    pub fn new(tenant: TenantKey, total_sheets: u32, timeout_ms: i64, now_ms: i64) -> Self {
        let mut state = Self {
            tenant,
            total_sheets,
            created_at: now_ms,
            timeout_ms,
            status: Status::ImageGeneration,
            generated_images: HashSet::new(),
            extracted_metadata: HashSet::new(),
            valid_sheets: HashSet::new(),
            sheet_number_map: BTreeMap::new(),
            detected_callouts: HashSet::new(),
            detected_layouts: HashSet::new(),
            generated_tiles: HashSet::new(),
            last_error: None,
        };
        // totalSheets = 0: the empty-set joins fire immediately.
        if total_sheets == 0 {
            state.status = Status::TileGeneration;
            state.status = Status::Complete;
        }
        state
    }

    pub fn check_reinitialize(&self, total_sheets: u32) -> Result<(), AlreadyInitialized> {
        if self.total_sheets != total_sheets {
            return Err(AlreadyInitialized {
                existing: self.total_sheets,
                requested: total_sheets,
            });
        }
        Ok(())
    }

    fn sorted_by_index<'a>(set: &'a HashSet<String>) -> Vec<&'a String> {
        let mut v: Vec<&String> = set.iter().collect();
        v.sort_by_key(|s| sheet_index(s).unwrap_or(usize::MAX));
        v
    }

    /// `validSheets`, ordered by sheet index, for the `planMetadataCompleted`
    /// event payload.
    pub fn valid_sheets_sorted(&self) -> Vec<String> {
        Self::sorted_by_index(&self.valid_sheets)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn report_image_generated(&mut self, sheet_id: &str) -> Effects {
        let mut effects = Effects::default();
        if self.status.is_terminal() {
            return effects;
        }
        let inserted = self.generated_images.insert(sheet_id.to_string());
        if !inserted {
            return effects;
        }
        if self.status == Status::ImageGeneration
            && self.generated_images.len() as u32 == self.total_sheets
        {
            self.status = Status::MetadataExtraction;
            for (i, id) in Self::sorted_by_index(&self.generated_images).into_iter().enumerate() {
                effects.metadata_jobs.push(MetadataJob {
                    plan_id: self.tenant.plan_id.clone(),
                    project_id: self.tenant.project_id.clone(),
                    organization_id: self.tenant.organization_id.clone(),
                    sheet_id: id.clone(),
                    sheet_number: (i + 1) as u32,
                    total_sheets: self.total_sheets,
                });
            }
        }
        effects
    }

    pub fn report_metadata_extracted(
        &mut self,
        sheet_id: &str,
        is_valid: bool,
        sheet_number: Option<String>,
    ) -> Effects {
        let mut effects = Effects::default();
        if self.status.is_terminal() {
            return effects;
        }
        let already_reported = self.extracted_metadata.contains(sheet_id);
        self.extracted_metadata.insert(sheet_id.to_string());

        if is_valid {
            self.valid_sheets.insert(sheet_id.to_string());
            if let Some(number) = sheet_number {
                self.sheet_number_map.insert(sheet_id.to_string(), number);
            } else {
                tracing::warn!(
                    sheet_id,
                    "valid sheet has no extracted sheetNumber; callout matching will degrade"
                );
            }
        }

        if already_reported {
            return effects;
        }

        if self.status == Status::MetadataExtraction
            && self.extracted_metadata.len() as u32 == self.total_sheets
        {
            effects.metadata_completed = true;
            self.status = Status::ParallelDetection;

            let valid_numbers: Vec<String> = Self::sorted_by_index(&self.valid_sheets)
                .into_iter()
                .filter_map(|id| self.sheet_number_map.get(id).cloned())
                .collect();

            for id in Self::sorted_by_index(&self.valid_sheets) {
                let number = self
                    .sheet_number_map
                    .get(id)
                    .cloned()
                    .unwrap_or_default();
                effects.callout_jobs.push(CalloutJob {
                    plan_id: self.tenant.plan_id.clone(),
                    project_id: self.tenant.project_id.clone(),
                    organization_id: self.tenant.organization_id.clone(),
                    sheet_id: id.clone(),
                    sheet_number: number.clone(),
                    valid_sheet_numbers: valid_numbers.clone(),
                });
                effects.layout_jobs.push(LayoutJob {
                    plan_id: self.tenant.plan_id.clone(),
                    project_id: self.tenant.project_id.clone(),
                    organization_id: self.tenant.organization_id.clone(),
                    sheet_id: id.clone(),
                    sheet_number: number,
                });
            }

            self.run_detection_join(&mut effects);
        }
        effects
    }

    pub fn report_callouts_detected(&mut self, sheet_id: &str) -> Effects {
        let mut effects = Effects::default();
        if self.status.is_terminal() {
            return effects;
        }
        self.detected_callouts.insert(sheet_id.to_string());
        self.run_detection_join(&mut effects);
        effects
    }

    pub fn report_layout_detected(&mut self, sheet_id: &str) -> Effects {
        let mut effects = Effects::default();
        if self.status.is_terminal() {
            return effects;
        }
        self.detected_layouts.insert(sheet_id.to_string());
        self.run_detection_join(&mut effects);
        effects
    }

    /// The join is a function of the state only; safe to evaluate on every inbound report.
    fn run_detection_join(&mut self, effects: &mut Effects) {
        if self.status != Status::ParallelDetection {
            return;
        }
        let total_valid = self.valid_sheets.len() as u32;
        if self.detected_callouts.len() as u32 == total_valid
            && self.detected_layouts.len() as u32 == total_valid
        {
            self.status = Status::TileGeneration;
            for id in Self::sorted_by_index(&self.valid_sheets) {
                effects.tiles_jobs.push(TilesJob {
                    plan_id: self.tenant.plan_id.clone(),
                    project_id: self.tenant.project_id.clone(),
                    organization_id: self.tenant.organization_id.clone(),
                    sheet_id: id.clone(),
                });
            }
            self.run_tile_join(effects);
        }
    }

    fn run_tile_join(&mut self, effects: &mut Effects) {
        if self.status != Status::TileGeneration {
            return;
        }
        if self.generated_tiles.len() as u32 == self.valid_sheets.len() as u32 {
            self.status = Status::Complete;
            effects.processing_completed = true;
        }
    }

    pub fn report_tiles_generated(&mut self, sheet_id: &str) -> Effects {
        let mut effects = Effects::default();
        if self.status.is_terminal() {
            return effects;
        }
        self.generated_tiles.insert(sheet_id.to_string());
        self.run_tile_join(&mut effects);
        effects
    }

    /// Transitions to `failed` from any non-terminal status. No-op if already terminal
    /// (late reports/alarms arriving after `failed` or `complete` change nothing).
    pub fn mark_failed(&mut self, error: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = Status::Failed;
        self.last_error = Some(error.into());
        true
    }

    pub fn progress(&self) -> Progress {
        let valid = self.valid_sheets.len() as u32;
        Progress {
            image_generation: StageProgress {
                completed: self.generated_images.len() as u32,
                total: self.total_sheets,
            },
            metadata_extraction: StageProgress {
                completed: self.extracted_metadata.len() as u32,
                total: self.total_sheets,
            },
            callout_detection: StageProgress {
                completed: self.detected_callouts.len() as u32,
                total: valid,
            },
            layout_detection: StageProgress {
                completed: self.detected_layouts.len() as u32,
                total: valid,
            },
            tile_generation: StageProgress {
                completed: self.generated_tiles.len() as u32,
                total: valid,
            },
        }
    }

    /// Checks the invariants from §3/§8. Intended for tests and debug assertions,
    /// not for the hot path.
    pub fn check_invariants(&self) -> Result<(), String> {
        for id in &self.generated_images {
            match sheet_index(id) {
                Some(i) if (i as u32) < self.total_sheets => {}
                _ => return Err(format!("generatedImages contains out-of-range {id}")),
            }
        }
        if !self.valid_sheets.is_subset(&self.extracted_metadata) {
            return Err("validSheets is not a subset of extractedMetadata".into());
        }
        if !self.detected_callouts.is_subset(&self.valid_sheets) {
            return Err("detectedCallouts is not a subset of validSheets".into());
        }
        if !self.detected_layouts.is_subset(&self.valid_sheets) {
            return Err("detectedLayouts is not a subset of validSheets".into());
        }
        if !self.generated_tiles.is_subset(&self.valid_sheets) {
            return Err("generatedTiles is not a subset of validSheets".into());
        }
        for key in self.sheet_number_map.keys() {
            if !self.valid_sheets.contains(key) {
                return Err(format!("sheetNumberMap has key {key} outside validSheets"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant() -> TenantKey {
        TenantKey::new("O", "P", "L")
    }

    #[test]
    fn zero_sheets_completes_immediately() {
        let state = CoordinatorState::new(tenant(), 0, 1_800_000, 0);
        assert_eq!(state.status, Status::Complete);
        state.check_invariants().unwrap();
    }

    #[test]
    fn single_page_happy_path() {
        let mut state = CoordinatorState::new(tenant(), 1, 1_800_000, 0);

        let effects = state.report_image_generated("sheet-0");
        assert_eq!(state.status, Status::MetadataExtraction);
        assert_eq!(effects.metadata_jobs.len(), 1);

        let effects =
            state.report_metadata_extracted("sheet-0", true, Some("A1".to_string()));
        assert!(effects.metadata_completed);
        assert_eq!(state.status, Status::ParallelDetection);
        assert_eq!(effects.callout_jobs.len(), 1);
        assert_eq!(effects.layout_jobs.len(), 1);
        assert_eq!(effects.callout_jobs[0].valid_sheet_numbers, vec!["A1".to_string()]);

        let effects = state.report_callouts_detected("sheet-0");
        assert!(effects.tiles_jobs.is_empty());
        assert_eq!(state.status, Status::ParallelDetection);

        let effects = state.report_layout_detected("sheet-0");
        assert_eq!(state.status, Status::TileGeneration);
        assert_eq!(effects.tiles_jobs.len(), 1);

        let effects = state.report_tiles_generated("sheet-0");
        assert!(effects.processing_completed);
        assert_eq!(state.status, Status::Complete);
        state.check_invariants().unwrap();
    }

    #[test]
    fn middle_sheet_invalid_excludes_from_detection_fanout() {
        let mut state = CoordinatorState::new(tenant(), 3, 1_800_000, 0);
        for i in 0..3 {
            state.report_image_generated(&format!("sheet-{i}"));
        }
        state.report_metadata_extracted("sheet-0", true, Some("A1".to_string()));
        state.report_metadata_extracted("sheet-1", false, None);
        let effects =
            state.report_metadata_extracted("sheet-2", true, Some("S1".to_string()));

        assert_eq!(effects.callout_jobs.len(), 2);
        assert_eq!(state.valid_sheets.len(), 2);
        assert!(!state.valid_sheets.contains("sheet-1"));

        state.report_callouts_detected("sheet-0");
        state.report_layout_detected("sheet-0");
        state.report_callouts_detected("sheet-2");
        let effects = state.report_layout_detected("sheet-2");
        assert_eq!(state.status, Status::TileGeneration);
        assert_eq!(effects.tiles_jobs.len(), 2);
        state.check_invariants().unwrap();
    }

    #[test]
    fn zero_valid_sheets_skips_detection_and_tiles() {
        let mut state = CoordinatorState::new(tenant(), 1, 1_800_000, 0);
        state.report_image_generated("sheet-0");
        let effects = state.report_metadata_extracted("sheet-0", false, None);
        assert!(effects.callout_jobs.is_empty());
        assert!(effects.layout_jobs.is_empty());
        assert!(effects.tiles_jobs.is_empty());
        assert!(effects.processing_completed);
        assert_eq!(state.status, Status::Complete);
    }

    #[test]
    fn duplicate_image_generated_report_is_a_no_op() {
        let mut state = CoordinatorState::new(tenant(), 2, 1_800_000, 0);
        state.report_image_generated("sheet-0");
        let before = state.generated_images.clone();
        let effects = state.report_image_generated("sheet-0");
        assert_eq!(before, state.generated_images);
        assert!(effects.metadata_jobs.is_empty());
    }

    #[test]
    fn callout_and_layout_reports_commute() {
        let mut a = CoordinatorState::new(tenant(), 1, 1_800_000, 0);
        a.report_image_generated("sheet-0");
        a.report_metadata_extracted("sheet-0", true, Some("A1".to_string()));
        a.report_callouts_detected("sheet-0");
        a.report_layout_detected("sheet-0");

        let mut b = CoordinatorState::new(tenant(), 1, 1_800_000, 0);
        b.report_image_generated("sheet-0");
        b.report_metadata_extracted("sheet-0", true, Some("A1".to_string()));
        b.report_layout_detected("sheet-0");
        b.report_callouts_detected("sheet-0");

        assert_eq!(a.status, b.status);
        assert_eq!(a.detected_callouts, b.detected_callouts);
        assert_eq!(a.detected_layouts, b.detected_layouts);
    }

    #[test]
    fn mark_failed_absorbs_late_reports() {
        let mut state = CoordinatorState::new(tenant(), 1, 1_800_000, 0);
        assert!(state.mark_failed("Processing timeout exceeded"));
        assert_eq!(state.status, Status::Failed);
        let before = state.clone();
        let effects = state.report_image_generated("sheet-0");
        assert!(effects.metadata_jobs.is_empty());
        assert_eq!(before.generated_images, state.generated_images);
        assert!(!state.mark_failed("again"));
    }

    #[test]
    fn reinitialize_with_same_total_is_idempotent() {
        let state = CoordinatorState::new(tenant(), 4, 1_800_000, 0);
        assert!(state.check_reinitialize(4).is_ok());
        assert!(state.check_reinitialize(5).is_err());
    }

    #[test]
    fn percent_is_non_decreasing_across_stage_boundaries() {
        let mut state = CoordinatorState::new(tenant(), 1, 1_800_000, 0);
        let mut last = state.progress().percent(state.status);
        assert_eq!(last, 0);

        state.report_image_generated("sheet-0");
        let next = state.progress().percent(state.status);
        assert!(next >= last, "{next} < {last}");
        last = next;

        state.report_metadata_extracted("sheet-0", true, Some("A1".to_string()));
        let next = state.progress().percent(state.status);
        assert!(next >= last, "{next} < {last}");
        last = next;

        state.report_callouts_detected("sheet-0");
        let next = state.progress().percent(state.status);
        assert!(next >= last, "{next} < {last}");
        last = next;

        state.report_layout_detected("sheet-0");
        let next = state.progress().percent(state.status);
        assert!(next >= last, "{next} < {last}");
        last = next;

        state.report_tiles_generated("sheet-0");
        let next = state.progress().percent(state.status);
        assert!(next >= last, "{next} < {last}");
        assert_eq!(next, 100);
    }

    #[test]
    fn percent_reaches_100_for_zero_sheet_and_zero_valid_sheet_plans() {
        let state = CoordinatorState::new(tenant(), 0, 1_800_000, 0);
        assert_eq!(state.progress().percent(state.status), 100);

        let mut state = CoordinatorState::new(tenant(), 1, 1_800_000, 0);
        state.report_image_generated("sheet-0");
        state.report_metadata_extracted("sheet-0", false, None);
        assert_eq!(state.status, Status::Complete);
        assert_eq!(state.progress().percent(state.status), 100);
    }
}
