//! Application orchestrator.
//! Loads/merges config, initializes logging, installs the signal handler,
//! opens a session on the state directory and dispatches the subcommand.

use anyhow::Result;
use std::sync::mpsc;
use std::thread;
use tracing::{debug, error};

use batch_split::config::{CONFIG_ENV, LoadResult, load_or_init};
use batch_split::output as out;
use batch_split::{BatchError, BatchRequest, ProgressEvent, RootsGate, Session, default_config_path};

use crate::cli::{self, Args, Command};
use crate::logging::init_tracing;

/// Run the CLI application.
pub fn run(args: Args) -> Result<()> {
    if args.print_config {
        print_config_location();
        return Ok(());
    }

    let loaded = load_or_init()?;
    if let LoadResult::CreatedTemplate(_, path) = &loaded {
        out::print_success(&format!("A template batch_split config was written to: {}", path.display()));
        out::print_info(&format!(
            "Defaults are in effect; edit it to change batch size, prefix or state location. Set {CONFIG_ENV} to use another file."
        ));
    }
    let mut cfg = loaded.into_config();
    args.apply_overrides(&mut cfg);

    // Held until return so the file appender flushes.
    let _guard = init_tracing(&cfg.log_level, cfg.log_file.as_deref(), args.json).map_err(|e| {
        out::print_error(&format!("Failed to initialize logging: {e}"));
        e
    })?;

    let Some(command) = args.command.clone() else {
        out::print_info("Nothing to do; see `batch_split --help`.");
        return Ok(());
    };

    let result = (|| -> Result<()> {
        cfg.validate()?;
        let session = Session::open(&cfg, RootsGate::from_config(&cfg))?;

        let cancel = session.cancel_token();
        ctrlc::set_handler(move || {
            cancel.cancel();
            out::print_warn("Received interrupt; finishing in-flight files and saving progress...");
        })?;

        debug!(?command, "dispatching");
        dispatch(&session, &command, &args)
    })();

    if let Err(e) = &result {
        match e.downcast_ref::<BatchError>() {
            Some(be) => error!(code = be.code(), validation = be.is_validation(), error = %be, "command failed"),
            None => error!(error = ?e, "command failed"),
        }
    }
    result
}

fn dispatch(session: &Session, command: &Command, args: &Args) -> Result<()> {
    let json = args.json;
    let cfg = session.config();
    match command {
        Command::Scan { folder } => {
            let summary = session.scan(folder)?;
            if json { out::print_json(&summary) } else { out::print_scan(&summary) }
        }
        Command::Preview { plan } => {
            let preview = session.preview_batches(&plan.folder, cfg.max_files_per_batch, cfg.sort_by)?;
            if json { out::print_json(&preview) } else { out::print_preview(&preview) }
        }
        Command::Run { plan, output, copy, .. } => {
            let mut req = BatchRequest::new(&plan.folder, cfg);
            req.output_dir = output.clone();
            req.mode = cli::mode_for(*copy);
            let outcome = with_progress(json, |tx| session.execute_batch(&req, Some(tx)))?;
            if json { out::print_json(&outcome) } else { out::print_outcome(&outcome) }
        }
        Command::Resume => {
            let outcome = with_progress(json, |tx| session.resume_batch(Some(tx)))?;
            if json { out::print_json(&outcome) } else { out::print_outcome(&outcome) }
        }
        Command::Status => match session.check_interrupted_progress()? {
            Some(s) if json => out::print_json(&s),
            Some(s) => out::print_interrupted(&s),
            None if json => out::print_json(&serde_json::Value::Null),
            None => out::print_info("no interrupted operation"),
        },
        Command::Discard => {
            let existed = session.discard_interrupted_progress()?;
            if json {
                out::print_json(&serde_json::json!({ "discarded": existed }));
            } else if existed {
                out::print_success("interrupted operation discarded; files were left where they are");
            } else {
                out::print_info("no interrupted operation");
            }
        }
        Command::Undo { operation_id } => {
            let report = with_progress(json, |tx| session.rollback(operation_id.as_deref(), Some(tx)))?;
            if json { out::print_json(&report) } else { out::print_undo(&report) }
        }
        Command::History => {
            let entries = session.list_history()?;
            if json { out::print_json(&entries) } else { out::print_history(&entries) }
        }
        Command::Check { operation_id } => {
            let report = session.validate_history_entry(operation_id)?;
            if json { out::print_json(&report) } else { out::print_validation(&report) }
        }
    }
    Ok(())
}

/// Run `f` with a progress channel drained by a printer thread.
fn with_progress<T>(
    json: bool,
    f: impl FnOnce(&mpsc::Sender<ProgressEvent>) -> Result<T>,
) -> Result<T> {
    let (tx, rx) = mpsc::channel::<ProgressEvent>();
    let printer = thread::spawn(move || {
        let mut drew = false;
        for event in rx {
            match event {
                ProgressEvent::Progress(p) if !json => {
                    out::print_progress(&p);
                    drew = true;
                }
                ProgressEvent::Progress(_) => {}
                ProgressEvent::Finished { .. } => break,
            }
        }
        if drew {
            out::end_progress();
        }
    });
    let result = f(&tx);
    drop(tx);
    let _ = printer.join();
    result
}

fn print_config_location() {
    if let Ok(cfg_env) = std::env::var(CONFIG_ENV) {
        out::print_info(&format!("Using {CONFIG_ENV} (explicit):\n  {cfg_env}\n"));
        out::print_info(&format!("To override, unset {CONFIG_ENV} or set it to another file."));
        return;
    }
    match default_config_path() {
        Ok(p) => {
            out::print_info(&format!("Default batch_split config path:\n  {}\n", p.display()));
            if p.exists() {
                out::print_info("A config file already exists at that location.");
            } else {
                out::print_info("No config file exists there yet. Run any command to create a template.");
            }
        }
        Err(e) => out::print_error(&format!("Could not determine a default config path: {e}")),
    }
}
