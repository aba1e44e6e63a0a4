use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::commands::describe;
use crate::config::load_config_or_default;
use crate::pipeline::{Pipeline, PromptRequest, ReplySink};
use crate::util::print_flush;

struct StdoutSink {
    quiet: bool,
    printed: bool,
}

impl ReplySink for StdoutSink {
    fn delta(&mut self, text: &str) {
        if !self.quiet {
            print_flush(text);
            self.printed = true;
        }
    }
}

pub async fn run_prompt(prompt: &str, files: &[PathBuf], json: bool) -> Result<()> {
    let cfg = load_config_or_default()?;
    let pipeline = Pipeline::from_config(&cfg)?;

    let mut req = PromptRequest::new(prompt);
    for file in files {
        let content = fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file.display().to_string());
        req = req.with_file(name, content);
    }

    let mut sink = StdoutSink {
        quiet: json,
        printed: false,
    };
    let outcome = pipeline.run(&req, &mut sink).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }
    if sink.printed {
        println!();
    } else if let Some(reply) = &outcome.reply {
        println!("{reply}");
    }
    for record in &outcome.results {
        println!("{}", describe(record));
    }
    let failed = outcome.results.iter().filter(|r| r.result.is_error()).count();
    if failed > 0 {
        println!("{failed} of {} actions failed", outcome.results.len());
    }
    Ok(())
}
