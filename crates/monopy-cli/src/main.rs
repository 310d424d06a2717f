use std::env;

use atty::Stream;
use clap::Parser;
use color_eyre::Result;
use monopy_core::commands::exit_code;
use monopy_core::{CommandStatus, ExecutionOutcome, GlobalOptions, WorkspaceContext};
use serde_json::{json, Value};

mod cli;
mod dispatch;
mod style;

use cli::MonopyCli;
use style::Style;

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = MonopyCli::parse();
    let global = GlobalOptions {
        quiet: cli.quiet,
        verbose: cli.verbose,
        trace: cli.trace,
        json: cli.json,
    };
    init_tracing(&global);

    let start = match &cli.workspace {
        Some(path) => path.clone(),
        None => env::current_dir()?,
    };
    let (command, outcome) = match WorkspaceContext::open(&start, cli.backend.into()) {
        Ok(ctx) => dispatch::dispatch_command(&ctx, &cli.command, global.verbose > 0),
        Err(err) => ("workspace", ExecutionOutcome::from_error(&err)),
    };
    let code = emit_output(&cli, &global, command, &outcome)?;

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(global: &GlobalOptions) {
    let level = if global.trace {
        "trace"
    } else if global.quiet {
        "warn"
    } else {
        match global.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = format!("monopy_core={level},monopy_domain={level},monopy={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn emit_output(
    cli: &MonopyCli,
    global: &GlobalOptions,
    command: &str,
    outcome: &ExecutionOutcome,
) -> Result<i32> {
    let code = exit_code(&outcome.details).unwrap_or(match outcome.status {
        CommandStatus::Ok => 0,
        CommandStatus::UserError => 1,
        CommandStatus::Failure => 2,
    });

    let style = Style::new(cli.no_color, atty::is(Stream::Stdout));

    if global.json {
        let payload = json!({
            "command": command,
            "status": outcome.status,
            "message": outcome.message,
            "details": outcome.details,
            "exitCode": code,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else if !global.quiet {
        if is_passthrough(&outcome.details) {
            if !outcome.message.is_empty() {
                println!("{}", outcome.message);
            }
        } else {
            let mut lines = outcome.message.lines();
            let headline = lines.next().unwrap_or_default();
            println!("{}", style.status(outcome.status, headline));
            for line in lines {
                println!("  {line}");
            }
            if command == "graph" {
                if let Some(table) = render_edge_table(&style, &outcome.details) {
                    println!("{table}");
                }
            }
            if let Some(path) = outcome.details.get("buildFolderPath").and_then(Value::as_str) {
                println!("{}", style.info(&format!("Build folder: {path}")));
            }
        }
    } else if outcome.status != CommandStatus::Ok {
        eprintln!("{}", outcome.message);
    }

    Ok(code)
}

fn is_passthrough(details: &Value) -> bool {
    details
        .as_object()
        .and_then(|map| map.get("passthrough"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn render_edge_table(style: &Style, details: &Value) -> Option<String> {
    let edges = details.get("edges")?.as_array()?;
    if edges.is_empty() {
        return None;
    }
    let rows: Vec<[&str; 3]> = edges
        .iter()
        .filter_map(|edge| {
            Some([
                edge.get("source")?.as_str()?,
                edge.get("target")?.as_str()?,
                edge.get("type")?.as_str()?,
            ])
        })
        .collect();

    let headers = ["Project", "Depends on", "Type"];
    let mut widths = headers.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }
    let format_row = |cells: [&str; 3]| {
        format!(
            "{:<w0$}  {:<w1$}  {}",
            cells[0],
            cells[1],
            cells[2],
            w0 = widths[0],
            w1 = widths[1],
        )
    };

    let mut lines = vec![style.table_header(&format_row(headers))];
    lines.push(format!(
        "{:-<w0$}  {:-<w1$}  {:-<w2$}",
        "",
        "",
        "",
        w0 = widths[0],
        w1 = widths[1],
        w2 = widths[2],
    ));
    lines.extend(rows.into_iter().map(format_row));
    Some(lines.join("\n"))
}
