// UI layer: console reporting for the resumable upload. Progress per range
// goes through an `indicatif` bar, the resume question through `dialoguer`,
// and the final result is printed once.

use crate::api::{ApiClient, TwoLegged};
use crate::error::UploadError;
use crate::plan::ByteRange;
use crate::session::{SessionCheckpoint, UploadSession};
use crate::state::StateDir;
use crate::upload::{UploadObserver, UploadOptions, UploadOutcome, Uploader};
use anyhow::{Context, Result};
use crossterm::style::Stylize;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::path::Path;

/// What to do when an unfinished upload of the same file is on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResumeMode {
    Always,
    Never,
    Ask,
}

/// Progress bar over the file's bytes, advanced as ranges are accepted.
pub struct ConsoleProgress {
    bar: ProgressBar,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner} [{bar:40}] {bytes}/{total_bytes} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        ConsoleProgress { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }

    // A hidden bar (output not a terminal) drops its println calls.
    fn line(&self, message: String) {
        if self.bar.is_hidden() {
            println!("{}", message);
        } else {
            self.bar.println(message);
        }
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadObserver for ConsoleProgress {
    fn on_start(&mut self, session: &UploadSession, resumed: bool) {
        let target = &session.target;
        self.bar.set_length(target.total_size);
        let done = session
            .plan
            .iter()
            .take(session.next_range_index)
            .map(|r| r.length)
            .sum();
        self.bar.set_position(done);
        let verb = if resumed { "Resuming" } else { "Uploading" };
        self.line(format!(
            "{} file: {} in {} pieces (session {})",
            verb,
            target.object_key,
            session.plan.len(),
            session.session_id
        ));
    }

    fn on_range(&mut self, range: &ByteRange, total_size: u64) {
        self.bar.set_message(format!("range {}", range.index));
        self.line(format!("Loading {}", range.content_range(total_size)));
    }

    fn on_accepted(&mut self, range: &ByteRange) {
        self.bar.inc(range.length);
        self.line("Partial upload accepted".into());
    }

    fn on_retry(&mut self, range: &ByteRange, attempt: u32, error: &UploadError) {
        self.line(format!("Retrying range {} (attempt {}): {}", range, attempt, error));
    }
}

/// Decide whether to continue from `checkpoint`, prompting when allowed.
pub fn should_resume(mode: ResumeMode, checkpoint: Option<&SessionCheckpoint>) -> Result<bool> {
    let Some(checkpoint) = checkpoint else {
        return Ok(false);
    };
    match mode {
        ResumeMode::Always => Ok(true),
        ResumeMode::Never => Ok(false),
        ResumeMode::Ask if !std::io::stdin().is_terminal() => Ok(false),
        ResumeMode::Ask => {
            let session = &checkpoint.session;
            let prompt = format!(
                "An unfinished upload of {} stopped at piece {} of {}. Resume it?",
                session.target.object_key,
                session.next_range_index + 1,
                session.plan.len()
            );
            Confirm::new()
                .with_prompt(prompt)
                .default(true)
                .interact()
                .context("Failed to read resume answer")
        }
    }
}

/// Resolve the bucket, ask about a saved checkpoint, run the upload and
/// report the outcome.
pub fn run_resumable(
    api: &ApiClient,
    state: &StateDir,
    file: &Path,
    bucket: Option<&str>,
    mut options: UploadOptions,
    resume: ResumeMode,
) -> Result<UploadOutcome> {
    let bucket_key = state.current_bucket(bucket)?;

    if let Some(name) = file.file_name().map(|n| n.to_string_lossy()) {
        let checkpoint = state.load_checkpoint(&bucket_key, &name)?;
        options.resume = should_resume(resume, checkpoint.as_ref())?;
    }

    let credentials = TwoLegged::new(api, state);
    let uploader = Uploader::new(api, &credentials, state);
    let mut progress = ConsoleProgress::new();
    let result = uploader.resumable_upload(file, &bucket_key, &options, &mut progress);
    progress.finish();

    let outcome = result?;
    report_success(&outcome);
    Ok(outcome)
}

pub fn report_success(outcome: &UploadOutcome) {
    println!("{}", "Upload successful".green());
    println!("ID: {}", outcome.descriptor.object_id);
    println!("URN: {}", outcome.urn);
    println!("URN (safe): {}", outcome.urn_safe);
    println!("Location: {}", outcome.descriptor.location);
}

pub fn report_failure(error: &anyhow::Error) {
    eprintln!("{} {:#}", "error:".red(), error);
}
