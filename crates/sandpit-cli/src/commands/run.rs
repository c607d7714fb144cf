use anyhow::{Context, Result};
use sandpit_runtime::{ExecutionRequest, Executor, LanguageTable};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

pub async fn execute(
    file: PathBuf,
    lang: String,
    stdin: Option<PathBuf>,
    timeout: Option<u64>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let config = super::load_config(config_path)?;

    let code = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let mut request = ExecutionRequest::new(lang, code);
    if let Some(path) = stdin {
        let input = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        request = request.with_stdin(input);
    }
    if let Some(seconds) = timeout {
        request = request.with_timeout(seconds);
    }

    let runtime_config = config.runtime_config();
    tokio::fs::create_dir_all(&runtime_config.scratch_root).await?;
    let executor = Executor::new(runtime_config, Arc::new(LanguageTable::builtin()));

    let result = executor.execute(request).await?;

    let mut out = std::io::stdout().lock();
    out.write_all(result.stdout.as_bytes())?;
    out.flush()?;

    let mut err = std::io::stderr().lock();
    err.write_all(result.stderr.as_bytes())?;
    err.flush()?;

    Ok(())
}
