use anyhow::Result;
use rust_xlsxwriter::{Format, Workbook, Worksheet};

use crate::metrics::EXPORTS_GENERATED_TOTAL;
use crate::models::{CompletedTask, ExperimentSnapshot, TrialResult};

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

pub struct ExportService;

impl ExportService {
    pub fn file_name(snapshot: &ExperimentSnapshot) -> String {
        format!("digit-span-{}.xlsx", snapshot.experiment_id)
    }

    /// Workbook with an Overview, a per-task summary and every scored or practice trial.
    pub fn build_xlsx(snapshot: &ExperimentSnapshot) -> Result<Vec<u8>> {
        let mut workbook = Workbook::new();
        let header_format = Format::new().set_bold();

        let overview = workbook.add_worksheet().set_name("Overview")?;
        Self::write_overview(overview, snapshot, &header_format)?;

        let tasks = workbook.add_worksheet().set_name("Tasks")?;
        Self::write_tasks(tasks, &snapshot.completed_tasks, &header_format)?;

        let trials = workbook.add_worksheet().set_name("Trials")?;
        Self::write_trials(trials, &snapshot.completed_tasks, &header_format)?;

        let mut cursor = std::io::Cursor::new(Vec::new());
        workbook.save_to_writer(&mut cursor)?;

        EXPORTS_GENERATED_TOTAL.with_label_values(&["xlsx"]).inc();
        Ok(cursor.into_inner())
    }

    fn write_overview(
        worksheet: &mut Worksheet,
        snapshot: &ExperimentSnapshot,
        header_format: &Format,
    ) -> Result<()> {
        worksheet.set_column_width(0, 24.0)?;
        worksheet.set_column_width(1, 36.0)?;

        let (total, correct) = snapshot
            .completed_tasks
            .iter()
            .fold((0u32, 0u32), |(total, correct), task| {
                (
                    total + task.result.total_trials,
                    correct + task.result.correct_trials,
                )
            });

        let rows = [
            ("Experiment", snapshot.experiment_id.clone()),
            ("Participant", snapshot.participant_id.clone()),
            ("Mode", snapshot.mode.as_str().to_string()),
            ("Sequence", snapshot.sequence.as_str().to_string()),
            ("Stage", snapshot.stage.to_string()),
            ("Started", snapshot.created_at.to_rfc3339()),
            ("Updated", snapshot.updated_at.to_rfc3339()),
            ("Tasks completed", snapshot.completed_tasks.len().to_string()),
            ("Total trials", total.to_string()),
            ("Correct trials", correct.to_string()),
            (
                "Accuracy (%)",
                format!("{:.1}", crate::models::accuracy_percent(correct, total)),
            ),
            (
                "Result ID",
                snapshot.result_id.clone().unwrap_or_else(|| "-".to_string()),
            ),
        ];

        worksheet.write_string_with_format(0, 0, "Field", header_format)?;
        worksheet.write_string_with_format(0, 1, "Value", header_format)?;
        for (row, (label, value)) in rows.iter().enumerate() {
            let row = row as u32 + 1;
            worksheet.write_string(row, 0, *label)?;
            worksheet.write_string(row, 1, value)?;
        }
        Ok(())
    }

    fn write_tasks(
        worksheet: &mut Worksheet,
        tasks: &[CompletedTask],
        header_format: &Format,
    ) -> Result<()> {
        let headers = [
            "Task",
            "Series",
            "Music",
            "Total trials",
            "Correct trials",
            "Accuracy (%)",
            "Discontinued",
        ];
        for (col, header) in headers.iter().enumerate() {
            worksheet.write_string_with_format(0, col as u16, *header, header_format)?;
        }

        for (row, task) in tasks.iter().enumerate() {
            let row = row as u32 + 1;
            worksheet.write_number(row, 0, (task.task_index + 1) as f64)?;
            worksheet.write_string(row, 1, task.condition.series.as_str())?;
            worksheet.write_boolean(row, 2, task.condition.with_music)?;
            worksheet.write_number(row, 3, f64::from(task.result.total_trials))?;
            worksheet.write_number(row, 4, f64::from(task.result.correct_trials))?;
            worksheet.write_number(row, 5, task.result.accuracy)?;
            worksheet.write_boolean(row, 6, task.result.discontinued)?;
        }
        Ok(())
    }

    fn write_trials(
        worksheet: &mut Worksheet,
        tasks: &[CompletedTask],
        header_format: &Format,
    ) -> Result<()> {
        let headers = [
            "Task",
            "Trial",
            "Trial ID",
            "Kind",
            "Span",
            "Digits shown",
            "Correct answer",
            "Response",
            "Correct",
            "Response time (ms)",
        ];
        for (col, header) in headers.iter().enumerate() {
            worksheet.write_string_with_format(0, col as u16, *header, header_format)?;
        }

        let mut row = 1u32;
        for task in tasks {
            for trial in &task.result.trial_results {
                worksheet.write_number(row, 0, (task.task_index + 1) as f64)?;
                worksheet.write_number(row, 1, (trial.trial_index + 1) as f64)?;
                worksheet.write_string(row, 2, &trial.trial_id)?;
                worksheet.write_string(row, 3, trial.trial_kind.as_str())?;
                worksheet.write_number(row, 4, trial.digits_shown.len() as f64)?;
                worksheet.write_string(row, 5, digit_string(&trial.digits_shown))?;
                worksheet.write_string(row, 6, digit_string(&trial.correct_answer))?;
                worksheet.write_string(row, 7, response_string(trial))?;
                worksheet.write_boolean(row, 8, trial.is_correct)?;
                worksheet.write_number(row, 9, trial.response_time as f64)?;
                row += 1;
            }
        }
        Ok(())
    }
}

fn digit_string(digits: &[u8]) -> String {
    digits.iter().map(|d| char::from(b'0' + d)).collect()
}

fn response_string(trial: &TrialResult) -> String {
    if trial.user_response.is_empty() {
        "-".to_string()
    } else {
        digit_string(&trial.user_response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ExperimentMode, ExperimentStage, PassFailLedger, SequencePlan, TaskResult, TrialKind,
    };
    use chrono::Utc;

    fn trial(index: usize, correct: bool) -> TrialResult {
        TrialResult {
            trial_id: format!("A{}", index),
            trial_index: index,
            is_practice: false,
            trial_kind: TrialKind::Main,
            digits_shown: vec![5, 2, 9],
            correct_answer: vec![9, 2, 5],
            user_response: if correct { vec![9, 2, 5] } else { Vec::new() },
            is_correct: correct,
            response_time: 1800,
            timestamp: Utc::now(),
        }
    }

    fn snapshot() -> ExperimentSnapshot {
        let result = TaskResult::summarize(
            vec![trial(0, true), trial(1, false)],
            PassFailLedger::new().record(3, true).record(3, false),
            false,
        );
        ExperimentSnapshot {
            experiment_id: "participant_1-1700000000000".to_string(),
            participant_id: "participant_1".to_string(),
            mode: ExperimentMode::Full,
            sequence: SequencePlan::A,
            stage: ExperimentStage::Completed,
            current_task_index: 1,
            task_count: 2,
            condition: None,
            task: None,
            completed_tasks: vec![CompletedTask {
                task_index: 0,
                condition: SequencePlan::A.conditions()[0],
                result,
            }],
            result_id: Some("r1".to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn workbook_is_a_zip_container() {
        let bytes = ExportService::build_xlsx(&snapshot()).unwrap();
        assert!(bytes.len() > 100);
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn file_name_uses_experiment_id() {
        assert_eq!(
            ExportService::file_name(&snapshot()),
            "digit-span-participant_1-1700000000000.xlsx"
        );
    }

    #[test]
    fn digits_render_without_separators() {
        assert_eq!(digit_string(&[9, 0, 4]), "904");
        assert_eq!(response_string(&trial(0, false)), "-");
        assert_eq!(response_string(&trial(0, true)), "925");
    }
}
