use std::fs;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::info;

use otuscope::cache::MemoryCache;
use otuscope::config::Settings;
use otuscope::engine::Engine;
use otuscope::error::{OtuscopeError, Result};
use otuscope::export::{ChunkSink, ExportChunk};
use otuscope::interface::{ExportRequest, OptionsRequest};
use otuscope::store::SqliteStore;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "otuscope=info".into()),
        )
        .init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let settings = Settings::load()?;
    info!(database = settings.database.as_str(), "starting");
    let source = Arc::new(SqliteStore::open(&settings.database)?);
    let engine = Engine::new(source, Arc::new(MemoryCache::new()), &settings)?;
    match args.get(1).map(String::as_str) {
        Some("options") => {
            let request: OptionsRequest = read_request(&args, 2)?;
            let outcome = engine.resolve_cascading_options(&request)?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Some("describe") => {
            let request: ExportRequest = read_request(&args, 2)?;
            println!("{}", engine.describe_export(&request)?);
            Ok(())
        }
        Some("export") => {
            let request: ExportRequest = read_request(&args, 2)?;
            let out_dir = args.get(3).ok_or_else(usage)?;
            engine.warm_kingdom_options()?;
            let handle = engine.start_export(&request)?;
            let mut sink = FileSink::new(PathBuf::from(out_dir))?;
            for chunk in &handle.chunks {
                sink.send(chunk)?;
            }
            sink.finish()?;
            handle.join()
        }
        _ => Err(usage()),
    }
}

fn usage() -> OtuscopeError {
    OtuscopeError::InvalidRequest(
        "usage: otuscope options <request.json> | describe <request.json> | \
         export <request.json> <out_dir>"
            .to_string(),
    )
}

fn read_request<T: serde::de::DeserializeOwned>(args: &[String], index: usize) -> Result<T> {
    let path = args.get(index).ok_or_else(usage)?;
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Writes each export entry as a file in the output directory.
struct FileSink {
    dir: PathBuf,
    current: Option<BufWriter<fs::File>>,
}

impl FileSink {
    fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, current: None })
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(mut writer) = self.current.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

impl ChunkSink for FileSink {
    fn send(&mut self, chunk: ExportChunk) -> Result<()> {
        match chunk {
            ExportChunk::BeginEntry { name } => {
                self.finish()?;
                let file = fs::File::create(self.dir.join(name))?;
                self.current = Some(BufWriter::new(file));
                Ok(())
            }
            ExportChunk::Data(bytes) => match self.current.as_mut() {
                Some(writer) => Ok(writer.write_all(&bytes)?),
                None => Err(OtuscopeError::InvalidRequest(
                    "export data before any entry".to_string(),
                )),
            },
        }
    }
}
