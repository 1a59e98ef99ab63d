//! `docshelf chat` — Interactive or single-message chat mode.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use docshelf_backend::GeminiBackend;
use docshelf_config::AppConfig;
use docshelf_convert::OfficeConverter;
use docshelf_core::artifact::{Artifact, ArtifactId, ArtifactStatus};
use docshelf_core::backend::ReasoningDepth;
use docshelf_session::{AssistantReply, Session};

pub async fn run(
    message: Option<String>,
    files: Vec<PathBuf>,
    urls: Vec<String>,
    depth: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    config.validate().map_err(|e| format!("Invalid config: {e}"))?;

    // Check for API key early — give a clear error
    let Some(api_key) = config.api_key.clone() else {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    GEMINI_API_KEY   = '...'");
        eprintln!("    DOCSHELF_API_KEY = '...'");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    };

    let mut depth_override: Option<ReasoningDepth> = match depth {
        Some(d) => Some(d.parse()?),
        None => None,
    };

    let mut backend = GeminiBackend::new(api_key)
        .with_count_model(config.model.clone())
        .with_timeout(Duration::from_secs(config.backend.request_timeout_secs));
    if let Some(base_url) = &config.backend.base_url {
        backend = backend.with_base_url(base_url);
    }

    let session = Session::new(&config, Arc::new(backend), Arc::new(OfficeConverter))
        .map_err(|e| format!("Failed to start session: {e}"))?;

    // Attach everything named on the command line and wait for the
    // pipeline to settle before the first message goes out.
    let mut initial: Vec<ArtifactId> = Vec::new();
    for path in files {
        match session.attach_path(path.clone()).await {
            Ok(id) => initial.push(id),
            Err(e) => eprintln!("  [Attach failed] {}: {e}", path.display()),
        }
    }
    for url in urls {
        match session.attach_url(&url).await {
            Ok(id) => initial.push(id),
            Err(e) => eprintln!("  [Attach failed] {url}: {e}"),
        }
    }
    if !initial.is_empty() {
        eprint!("  Ingesting {} file(s)...", initial.len());
        wait_for_ingestion(&session, &initial).await;
        eprintln!(" done.");
        print_shelf(&session).await;
    }

    if let Some(msg) = message {
        // Single message mode
        eprint!("  Thinking...");
        let result = match depth_override {
            Some(d) => session.send_with_depth(&msg, d).await,
            None => session.send(&msg).await,
        };
        eprint!("\r              \r");
        match result {
            Ok(reply) => println!("{}", reply.text),
            Err(e) => {
                session.close().await;
                return Err(format!("Turn failed: {e}").into());
            }
        }
        session.close().await;
        return Ok(());
    }

    // Interactive mode
    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║          DocShelf — Interactive Mode         ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Model:     {}", config.model);
    println!("  Max files: {}", config.max_files);
    println!();
    println!("  Shelf commands:");
    println!("    :attach <path-or-url>   add a file to the shelf");
    println!("    :remove <n>             remove file n (see :files)");
    println!("    :files                  list attached files");
    println!("    :budget                 show token budget");
    println!("    :depth <level>          set reasoning depth");
    println!("    :quit                   exit");
    println!();
    println!("  Anything else is sent to the model. Try /help for");
    println!("  analysis commands like /report and /synthesize.");
    println!();

    let stdin = std::io::stdin();
    loop {
        print!("  You > ");
        use std::io::Write;
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input, ":quit" | ":q" | "exit" | "quit") {
            break;
        }

        if let Some(rest) = input.strip_prefix(":attach ") {
            attach(&session, rest.trim()).await;
            continue;
        }
        if let Some(rest) = input.strip_prefix(":remove ") {
            remove(&session, rest.trim()).await;
            continue;
        }
        match input {
            ":files" => {
                print_shelf(&session).await;
                continue;
            }
            ":budget" => {
                print_budget(&session).await;
                continue;
            }
            _ => {}
        }
        if let Some(rest) = input.strip_prefix(":depth ") {
            match rest.trim().parse::<ReasoningDepth>() {
                Ok(d) => {
                    depth_override = Some(d);
                    println!("  Reasoning depth set to {}.", d.as_str());
                }
                Err(e) => eprintln!("  [Error] {e}"),
            }
            continue;
        }

        eprint!("  ...");
        let result = match depth_override {
            Some(d) => session.send_with_depth(input, d).await,
            None => session.send(input).await,
        };
        eprint!("\r     \r");
        match result {
            Ok(reply) => print_reply(&reply),
            Err(e) => {
                eprintln!("  [Error] {e}");
                println!();
            }
        }
    }

    session.close().await;
    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

fn print_reply(reply: &AssistantReply) {
    println!();
    if let Some(mode) = reply.mode {
        println!("  [{mode}]");
    }
    for line in reply.text.lines() {
        println!("  Assistant > {line}");
    }
    if let Some(usage) = &reply.usage {
        println!();
        println!("  ({} tokens this turn)", usage.total_tokens);
    }
    println!();
}

async fn attach(session: &Session, target: &str) {
    let result = if target.starts_with("http://") || target.starts_with("https://") {
        session.attach_url(target).await
    } else {
        session.attach_path(PathBuf::from(target)).await
    };
    match result {
        Ok(id) => {
            eprint!("  Ingesting...");
            wait_for_ingestion(session, std::slice::from_ref(&id)).await;
            eprintln!(" done.");
            if let Some(ArtifactStatus::Failed { reason }) = session.status(&id).await {
                eprintln!("  [Ingestion failed] {reason}");
            }
            print_shelf(session).await;
        }
        Err(e) => eprintln!("  [Attach failed] {e}"),
    }
}

async fn remove(session: &Session, index: &str) {
    let artifacts = session.artifacts().await;
    let Ok(n) = index.parse::<usize>() else {
        eprintln!("  [Error] :remove takes a file number from :files");
        return;
    };
    let Some(artifact) = artifacts.get(n.wrapping_sub(1)) else {
        eprintln!("  [Error] No file #{n} on the shelf");
        return;
    };
    match session.remove(&artifact.id).await {
        Ok(removed) => println!("  Removed {}.", removed.display_name),
        Err(e) => eprintln!("  [Error] {e}"),
    }
}

async fn wait_for_ingestion(session: &Session, ids: &[ArtifactId]) {
    loop {
        let mut pending = false;
        for id in ids {
            if let Some(status) = session.status(id).await {
                if !status.is_terminal() {
                    pending = true;
                }
            }
        }
        if !pending {
            return;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

async fn print_shelf(session: &Session) {
    let artifacts = session.artifacts().await;
    if artifacts.is_empty() {
        println!("  Shelf is empty. Use :attach <path-or-url>.");
        return;
    }
    println!();
    for (i, artifact) in artifacts.iter().enumerate() {
        println!("  {:>3}. {} {}", i + 1, status_glyph(artifact), describe(artifact));
    }
    println!();
}

fn status_glyph(artifact: &Artifact) -> &'static str {
    match artifact.status {
        ArtifactStatus::Pending => "[..]",
        ArtifactStatus::Converting => "[cv]",
        ArtifactStatus::Uploading => "[up]",
        ArtifactStatus::Ready => "[ok]",
        ArtifactStatus::Failed { .. } => "[!!]",
    }
}

fn describe(artifact: &Artifact) -> String {
    match (&artifact.status, artifact.token_count) {
        (ArtifactStatus::Failed { reason }, _) => {
            format!("{} — {reason}", artifact.display_name)
        }
        (_, Some(tokens)) => format!("{} ({tokens} tokens)", artifact.display_name),
        _ => artifact.display_name.clone(),
    }
}

async fn print_budget(session: &Session) {
    let budget = session.budget().await;
    println!();
    println!(
        "  Context: {} / {} tokens ({:.1}%)",
        budget.total(),
        budget.max_tokens,
        budget.percent_used()
    );
    println!("    files:      {}", budget.file_tokens);
    println!("    transcript: {}", budget.transcript_tokens);
    println!("    overhead:   {}", budget.overhead_tokens);
    println!("    remaining:  {}", budget.remaining());
    println!();
}
