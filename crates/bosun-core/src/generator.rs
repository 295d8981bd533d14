use crate::CoreError;
use bosun_schema::{diff_transactions, generate_config, ConfigDiff, Transaction};
use bosun_store::{write_atomic, TransactionFile};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Previous generator output, captured so a failed apply can be undone.
#[derive(Debug, Clone)]
pub struct GeneratorSnapshot {
    transaction: Transaction,
    text: Option<String>,
}

/// Drives the declarative configuration generator against its two files:
/// the generated configuration text and the last-applied transaction.
pub struct Generator {
    output_path: PathBuf,
    tx_file: TransactionFile,
}

impl Generator {
    pub fn new(output_path: impl Into<PathBuf>, tx_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            tx_file: TransactionFile::new(tx_path),
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// The last-applied transaction; empty when nothing was applied yet.
    pub fn current(&self) -> Result<Transaction, CoreError> {
        Ok(self.tx_file.load()?)
    }

    pub fn render(&self, tx: &Transaction) -> String {
        generate_config(tx)
    }

    pub fn diff(&self, proposed: &Transaction) -> Result<ConfigDiff, CoreError> {
        Ok(diff_transactions(&self.current()?, proposed))
    }

    /// Write the generated text for `proposed`, then record it as the new
    /// current transaction. Returns the diff against the previous state.
    pub fn apply(&self, proposed: &Transaction) -> Result<ConfigDiff, CoreError> {
        let diff = self.diff(proposed)?;
        let text = self.render(proposed);
        write_atomic(&self.output_path, text.as_bytes(), Some(0o644))?;
        self.tx_file.save(proposed)?;
        info!(
            "wrote {} ({} enabled app(s))",
            self.output_path.display(),
            proposed.enabled_apps().count()
        );
        for line in diff.lines() {
            debug!("  {line}");
        }
        Ok(diff)
    }

    pub fn snapshot(&self) -> Result<GeneratorSnapshot, CoreError> {
        let text = if self.output_path.exists() {
            Some(fs::read_to_string(&self.output_path)?)
        } else {
            None
        };
        Ok(GeneratorSnapshot {
            transaction: self.current()?,
            text,
        })
    }

    /// Put both files back the way `snapshot` found them.
    pub fn restore(&self, snapshot: &GeneratorSnapshot) -> Result<(), CoreError> {
        match &snapshot.text {
            Some(text) => write_atomic(&self.output_path, text.as_bytes(), Some(0o644))?,
            None => {
                if self.output_path.exists() {
                    fs::remove_file(&self.output_path)?;
                }
            }
        }
        self.tx_file.save(&snapshot.transaction)?;
        info!("restored previous generated configuration");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bosun_schema::{AppIntent, GENERATED_MARKER, NO_CHANGES};

    fn generator(dir: &tempfile::TempDir) -> Generator {
        Generator::new(
            dir.path().join("out/nested/apps.nix"),
            dir.path().join("state/transaction.json"),
        )
    }

    fn radarr(client: &str) -> Transaction {
        Transaction::new().with(
            "radarr",
            AppIntent::enabled().with_integration("downloadClient", client),
        )
    }

    #[test]
    fn apply_empty_transaction_writes_valid_body() {
        let dir = tempfile::tempdir().unwrap();
        let g = generator(&dir);
        g.apply(&Transaction::new()).unwrap();
        let text = fs::read_to_string(g.output_path()).unwrap();
        assert!(text.starts_with(GENERATED_MARKER));
        assert!(text.trim_end().ends_with('}'));
    }

    #[test]
    fn apply_persists_current_and_diff_converges() {
        let dir = tempfile::tempdir().unwrap();
        let g = generator(&dir);
        let tx = radarr("qbittorrent");
        let first = g.apply(&tx).unwrap();
        assert_eq!(first.lines(), vec!["Install radarr"]);
        assert_eq!(g.current().unwrap(), tx);
        assert_eq!(g.diff(&tx).unwrap().to_string(), NO_CHANGES);
    }

    #[test]
    fn regenerating_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let g = generator(&dir);
        let tx = radarr("qbittorrent");
        g.apply(&tx).unwrap();
        let a = fs::read(g.output_path()).unwrap();
        g.apply(&tx).unwrap();
        assert_eq!(a, fs::read(g.output_path()).unwrap());
    }

    #[test]
    fn restore_undoes_apply() {
        let dir = tempfile::tempdir().unwrap();
        let g = generator(&dir);
        g.apply(&radarr("transmission")).unwrap();
        let before_text = fs::read_to_string(g.output_path()).unwrap();

        let snap = g.snapshot().unwrap();
        g.apply(&radarr("qbittorrent")).unwrap();
        g.restore(&snap).unwrap();

        assert_eq!(fs::read_to_string(g.output_path()).unwrap(), before_text);
        assert_eq!(g.current().unwrap(), radarr("transmission"));
    }

    #[test]
    fn restore_of_first_apply_removes_output() {
        let dir = tempfile::tempdir().unwrap();
        let g = generator(&dir);
        let snap = g.snapshot().unwrap();
        g.apply(&radarr("qbittorrent")).unwrap();
        g.restore(&snap).unwrap();
        assert!(!g.output_path().exists());
        assert!(g.current().unwrap().is_empty());
    }
}
