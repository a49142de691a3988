//! CLI integration tests: configuration handling and the
//! import, run, show and export commands against files on disk.

use clap::Parser;
use holdagg::adapters::file_config_adapter::FileConfigAdapter;
use holdagg::adapters::sqlite_adapter::SqliteAdapter;
use holdagg::cli::{self, Backend, Cli};
use holdagg::domain::config_validation::build_engine_config;
use holdagg::domain::error::HoldaggError;
use holdagg::ports::config_port::ConfigPort;
use holdagg::ports::store_port::AggregationStore;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tempfile::TempDir;

const HOLDINGS_CSV: &str = "instrument_id,account_id,quantity,cost_per_unit,currency
X,acct-1,100,10,USD
X,acct-2,50,12,USD
Y,acct-1,10,20,USD
SAP,acct-3,20,100,eur
$CASH-USD,acct-1,5000,1,USD
";

const QUOTES_CSV: &str = "instrument_id,price,currency
X,15,USD
SAP,120,EUR
";

const RATES_CSV: &str = "from_currency,to_currency,rate
EUR,USD,1.1
";

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let ws = Workspace {
            dir: TempDir::new().unwrap(),
        };
        let db = ws.path("holdagg.db");
        ws.write(
            "holdagg.ini",
            &format!(
                "[engine]\nbase_currency = USD\n\n[sqlite]\npath = {}\n\n[schedule]\ninterval_secs = 60\n",
                db.display()
            ),
        );
        ws.write("holdings.csv", HOLDINGS_CSV);
        ws.write("quotes.csv", QUOTES_CSV);
        ws.write("rates.csv", RATES_CSV);
        ws
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn cli(&self, args: &[&str]) -> ExitCode {
        let config = self.path("holdagg.ini");
        let mut argv = vec![
            "holdagg".to_string(),
            "-c".to_string(),
            config.display().to_string(),
        ];
        argv.extend(args.iter().map(|a| a.to_string()));
        cli::run(Cli::try_parse_from(argv).unwrap())
    }

    fn arg(&self, name: &str) -> String {
        self.path(name).display().to_string()
    }

    fn config(&self) -> FileConfigAdapter {
        FileConfigAdapter::from_file(self.path("holdagg.ini")).unwrap()
    }

    fn adapter(&self) -> SqliteAdapter {
        SqliteAdapter::open_file(
            &self.path("holdagg.db").display().to_string(),
            2,
            Duration::from_secs(5),
        )
        .unwrap()
    }
}

mod config_handling {
    use super::*;

    #[test]
    fn validate_accepts_workspace_config() {
        let ws = Workspace::new();
        assert_eq!(ws.cli(&["validate"]), ExitCode::SUCCESS);
    }

    #[test]
    fn validate_reports_missing_base_currency() {
        let ws = Workspace::new();
        ws.write("holdagg.ini", "[sqlite]\npath = x.db\n");
        assert_eq!(ws.cli(&["validate"]), ExitCode::from(2));
    }

    #[test]
    fn missing_config_file_is_a_config_error() {
        let code = cli::run(
            Cli::try_parse_from(["holdagg", "-c", "/nonexistent/holdagg.ini", "validate"]).unwrap(),
        );
        assert_eq!(code, ExitCode::from(2));
    }

    #[test]
    fn engine_config_from_ini() {
        let adapter = FileConfigAdapter::from_string(
            "[engine]\nbase_currency = eur\ncash_prefix = CASH:\nshare_policy = complete_only\n",
        )
        .unwrap();
        let engine = build_engine_config(&adapter).unwrap();
        assert_eq!(engine.base_currency, "EUR");
        assert_eq!(engine.cash_prefix, "CASH:");
        assert_eq!(engine.share_policy.as_str(), "complete_only");
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let adapter =
            FileConfigAdapter::from_string("[store]\nbackend = oracle\n[sqlite]\npath = x.db\n")
                .unwrap();
        assert!(matches!(
            Backend::open(&adapter),
            Err(HoldaggError::ConfigInvalid { .. })
        ));
    }

    #[test]
    fn sqlite_backend_requires_path() {
        let adapter = FileConfigAdapter::from_string("[engine]\nbase_currency = USD\n").unwrap();
        assert!(adapter.get_string("sqlite", "path").is_none());
        assert!(matches!(
            Backend::open(&adapter),
            Err(HoldaggError::ConfigMissing { .. })
        ));
    }
}

mod commands {
    use super::*;

    #[test]
    fn import_run_and_export() {
        let ws = Workspace::new();
        assert_eq!(ws.cli(&["init"]), ExitCode::SUCCESS);
        assert_eq!(
            ws.cli(&[
                "import",
                "--holdings",
                &ws.arg("holdings.csv"),
                "--quotes",
                &ws.arg("quotes.csv"),
                "--rates",
                &ws.arg("rates.csv"),
            ]),
            ExitCode::SUCCESS
        );
        assert_eq!(ws.cli(&["run"]), ExitCode::SUCCESS);

        let rows = ws.adapter().load_all().unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.instrument_id.as_str()).collect();
        assert_eq!(ids, vec!["SAP", "X", "Y"]);
        assert!(rows[2].quote_missing);

        let out = ws.path("out.csv");
        assert_eq!(
            ws.cli(&["export", "-o", &out.display().to_string()]),
            ExitCode::SUCCESS
        );
        let exported = fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = exported.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("instrument_id,"));
        assert!(lines[1].starts_with("SAP,"));
        assert!(lines[2].starts_with("X,150.0,"));

        assert_eq!(ws.cli(&["show", "--limit", "2"]), ExitCode::SUCCESS);
        assert_eq!(ws.cli(&["history"]), ExitCode::SUCCESS);
        assert_eq!(ws.adapter().recent_runs(10).unwrap().len(), 1);
    }

    #[test]
    fn run_directly_from_csv_directory() {
        let ws = Workspace::new();
        let dir = ws.dir.path().display().to_string();
        assert_eq!(ws.cli(&["run", "--csv-dir", &dir]), ExitCode::SUCCESS);

        let rows = ws.adapter().load_all().unwrap();
        assert_eq!(rows.len(), 3);
        let x = rows.iter().find(|r| r.instrument_id == "X").unwrap();
        assert!((x.pl_ratio_pct - 40.625).abs() < 1e-9);
    }

    #[test]
    fn non_numeric_csv_value_exits_with_data_integrity() {
        let ws = Workspace::new();
        ws.write(
            "holdings.csv",
            "instrument_id,account_id,quantity,cost_per_unit,currency\nX,acct-1,ten,10,USD\n",
        );
        let dir = ws.dir.path().display().to_string();
        assert_eq!(ws.cli(&["run", "--csv-dir", &dir]), ExitCode::from(5));
        assert!(ws.adapter().load_all().unwrap().is_empty());
    }

    #[test]
    fn missing_csv_input_exits_with_input_unavailable() {
        let ws = Workspace::new();
        fs::remove_file(ws.path("rates.csv")).unwrap();
        let dir = ws.dir.path().display().to_string();
        assert_eq!(ws.cli(&["run", "--csv-dir", &dir]), ExitCode::from(4));
    }

    #[test]
    fn export_to_unwritable_path_fails() {
        let ws = Workspace::new();
        assert_eq!(ws.cli(&["init"]), ExitCode::SUCCESS);
        let bad = Path::new("/nonexistent/dir/out.csv").display().to_string();
        assert_eq!(ws.cli(&["export", "-o", &bad]), ExitCode::from(1));
    }

    #[test]
    fn build_coordinator_uses_configured_backend() {
        let ws = Workspace::new();
        let config = ws.config();
        let backend = Backend::open(&config).unwrap();
        backend.initialize_schema().unwrap();

        let coordinator = cli::build_coordinator(&config, &backend, None).unwrap();
        assert_eq!(coordinator.engine_config().base_currency, "USD");

        let summary = tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(coordinator.trigger_now())
            .unwrap();
        assert_eq!(summary.stats().unwrap().instrument_count, 0);
    }
}
