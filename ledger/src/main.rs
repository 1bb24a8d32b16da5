mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ledger_core::{
    BytesDataSource, DataChunkPiece, DataSource, DiskPieceStore, IdentifierFactory,
    IterationStatus, Object, ObjectDigest, ObjectReferences, ObjectType, Piece, PieceStore,
    PieceType, ReaderDataSource, SplitConfig, TreeNode, check_valid_tree_node_serialization,
    collect_garbage, collect_pieces, decode_tree_node, read_object, split_data_source,
};
use output::{
    CollectOutput, ConfigInfo, GcOutput, InitOutput, InspectNodeOutput, OutputWriter, PieceInfo,
    PutOutput, ReferenceInfo, RefsOutput, SplitOutput,
};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Ledger - content-addressed piece storage
#[derive(Parser)]
#[command(name = "ledger")]
#[command(about = "Split values into content-addressed pieces and inspect them", long_about = None)]
#[command(version)]
struct Cli {
    /// Store root directory (defaults to LEDGER_ROOT env var or ./ledger-store)
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    /// Splitter config file used by `init` and `split` (defaults to LEDGER_CONFIG env var)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new store
    Init,

    /// Split a file and store its pieces
    Put {
        /// File to store
        path: PathBuf,

        /// Store the content as an encoded tree node
        #[arg(long)]
        tree_node: bool,
    },

    /// Split a file and list its pieces without storing them
    Split {
        /// File to split
        path: PathBuf,

        /// Split the content as an encoded tree node
        #[arg(long)]
        tree_node: bool,
    },

    /// Output object content to stdout
    Cat {
        /// Digest of the object root
        digest: String,
    },

    /// List the objects an object references
    Refs {
        /// Digest of the object root
        digest: String,
    },

    /// Fetch every piece below a root concurrently
    Collect {
        /// Digest of the object root
        digest: String,
    },

    /// Decode a tree node from a file or a stored object
    InspectNode {
        /// Path of an encoded node, or digest of a stored tree node object
        source: String,
    },

    /// Delete pieces not reachable from the given roots
    Gc {
        /// Digests of the objects to keep
        roots: Vec<String>,

        /// Dry run - show what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_tracing();

    let output = OutputWriter::new(cli.json);
    match run(cli, &output) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output.write_error(&e, 1);
            ExitCode::FAILURE
        }
    }
}

/// Log to stderr, filtered by LEDGER_LOG (default `warn`).
fn setup_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_env("LEDGER_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli, output: &OutputWriter) -> Result<()> {
    // Determine store root: CLI arg > LEDGER_ROOT env var > ./ledger-store default
    let root = cli
        .root
        .or_else(|| std::env::var("LEDGER_ROOT").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("./ledger-store"));
    let config = cli
        .config
        .or_else(|| std::env::var("LEDGER_CONFIG").ok().map(PathBuf::from));

    match cli.command {
        Commands::Init => cmd_init(&root, config.as_deref(), output),
        Commands::Put { path, tree_node } => cmd_put(&root, &path, tree_node, output),
        Commands::Split { path, tree_node } => {
            cmd_split(&root, config.as_deref(), &path, tree_node, output)
        }
        Commands::Cat { digest } => cmd_cat(&root, &digest, output),
        Commands::Refs { digest } => cmd_refs(&root, &digest, output),
        Commands::Collect { digest } => cmd_collect(&root, &digest, output),
        Commands::InspectNode { source } => cmd_inspect_node(&root, &source, output),
        Commands::Gc { roots, dry_run } => cmd_gc(&root, &roots, dry_run, output),
    }
}

fn open_store(root: &Path) -> Result<DiskPieceStore> {
    DiskPieceStore::open(root)
        .with_context(|| format!("Failed to open store at {}", root.display()))
}

fn parse_digest(digest: &str) -> Result<ObjectDigest> {
    ObjectDigest::from_hex(digest).with_context(|| format!("Invalid digest: {}", digest))
}

/// Read splitter parameters from a config file, or use the defaults.
fn load_config(path: Option<&Path>) -> Result<SplitConfig> {
    let Some(path) = path else {
        return Ok(SplitConfig::default());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    SplitConfig::parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
}

fn object_type(tree_node: bool) -> ObjectType {
    if tree_node {
        ObjectType::TreeNode
    } else {
        ObjectType::Blob
    }
}

/// An existing store fixes the splitter parameters.
fn split_config(root: &Path, config_path: Option<&Path>) -> Result<SplitConfig> {
    if root.exists() {
        Ok(open_store(root)?.config().clone())
    } else {
        load_config(config_path)
    }
}

/// Root, size and piece count of a split file.
struct SplitFile {
    root: ObjectDigest,
    size: u64,
    pieces: usize,
}

/// Split a file, handing each piece to `sink` as the splitter emits it.
///
/// Blobs are read in blocks. Tree nodes are read whole, since they must be
/// validated before any piece is emitted.
fn split_path(
    config: &SplitConfig,
    path: &Path,
    tree_node: bool,
    mut sink: impl FnMut(&DataChunkPiece) -> Result<()>,
) -> Result<SplitFile> {
    let mut source: Box<dyn DataSource> = if tree_node {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read file {}", path.display()))?;
        if !check_valid_tree_node_serialization(&data) {
            anyhow::bail!("{} is not a valid encoded tree node", path.display());
        }
        Box::new(BytesDataSource::new(data))
    } else {
        let file =
            File::open(path).with_context(|| format!("Failed to open file {}", path.display()))?;
        let size = file
            .metadata()
            .with_context(|| format!("Failed to read metadata of {}", path.display()))?
            .len();
        Box::new(ReaderDataSource::new(file, size))
    };
    let size = source.size();

    let factory = IdentifierFactory::new();
    let mut root = None;
    let mut pieces = 0;
    let mut failed = false;
    let mut sink_error = None;
    split_data_source(
        source.as_mut(),
        object_type(tree_node),
        config,
        None,
        |digest| factory.identifier_for(digest),
        |status, piece| {
            if status == IterationStatus::Error {
                failed = true;
                return;
            }
            let Some(piece) = piece else {
                return;
            };
            pieces += 1;
            if status == IterationStatus::Done {
                root = Some(piece.identifier().digest().clone());
            }
            if sink_error.is_none()
                && let Err(e) = sink(&piece)
            {
                sink_error = Some(e);
            }
        },
    )
    .with_context(|| format!("Failed to split {}", path.display()))?;

    if let Some(e) = sink_error {
        return Err(e);
    }
    if failed {
        anyhow::bail!("Failed to read {} while splitting", path.display());
    }
    let root = root.with_context(|| format!("Splitting {} produced no root", path.display()))?;

    Ok(SplitFile { root, size, pieces })
}

fn cmd_init(root: &Path, config_path: Option<&Path>, output: &OutputWriter) -> Result<()> {
    let config = load_config(config_path)?;
    DiskPieceStore::init(root, &config)
        .with_context(|| format!("Failed to initialize store at {}", root.display()))?;

    let result = InitOutput {
        success: true,
        result_code: 0,
        root: root.display().to_string(),
        config: ConfigInfo::from(&config),
    };
    output.write(&result, || {
        format!(
            "Initialized ledger store at {}\n\
             Chunk size: {}..{} bytes, {} blob bits, {} bits per level\n",
            root.display(),
            config.min_chunk_size,
            config.max_chunk_size,
            config.blob_bits,
            config.bits_per_level
        )
    })
}

fn put_file(store: &DiskPieceStore, path: &Path, tree_node: bool) -> Result<PutOutput> {
    let mut stored = 0;
    let split = split_path(store.config(), path, tree_node, |piece| {
        if store
            .put(piece)
            .with_context(|| format!("Failed to store piece {}", piece.identifier().digest()))?
        {
            stored += 1;
        }
        Ok(())
    })?;

    tracing::debug!(
        path = %path.display(),
        pieces = split.pieces,
        stored,
        "stored file"
    );

    Ok(PutOutput {
        success: true,
        result_code: 0,
        path: path.display().to_string(),
        root: split.root,
        size: split.size,
        pieces: split.pieces,
        stored,
    })
}

fn cmd_put(root: &Path, path: &Path, tree_node: bool, output: &OutputWriter) -> Result<()> {
    let store = open_store(root)?;
    let result = put_file(&store, path, tree_node)?;
    output.write(&result, || format!("{} {}\n", result.root, result.path))
}

fn split_file(config: &SplitConfig, path: &Path, tree_node: bool) -> Result<SplitOutput> {
    let mut pieces = Vec::new();
    let split = split_path(config, path, tree_node, |piece| {
        pieces.push(PieceInfo::of(piece));
        Ok(())
    })?;

    Ok(SplitOutput {
        success: true,
        result_code: 0,
        path: path.display().to_string(),
        root: split.root,
        size: split.size,
        pieces,
    })
}

fn cmd_split(
    root: &Path,
    config_path: Option<&Path>,
    path: &Path,
    tree_node: bool,
    output: &OutputWriter,
) -> Result<()> {
    let config = split_config(root, config_path)?;
    let result = split_file(&config, path, tree_node)?;

    output.write(&result, || {
        let mut text = String::new();
        for piece in &result.pieces {
            let inline = if piece.info.inlined { " inline" } else { "" };
            text.push_str(&format!(
                "{} {} {}{}\n",
                piece.digest,
                piece.info.piece_type.as_str(),
                piece.size,
                inline
            ));
        }
        text.push_str(&format!("root {}\n", result.root));
        text
    })
}

fn cmd_cat(root: &Path, digest: &str, output: &OutputWriter) -> Result<()> {
    let store = open_store(root)?;
    let digest = parse_digest(digest)?;

    let factory = IdentifierFactory::new();
    let object = read_object(&store, &factory.identifier_for(digest.clone()))
        .with_context(|| format!("Failed to read object {}", digest))?;

    output.write_raw(object.data())
}

fn object_references(store: &DiskPieceStore, digest: ObjectDigest) -> Result<RefsOutput> {
    let factory = IdentifierFactory::new();
    let object = read_object(store, &factory.identifier_for(digest.clone()))
        .with_context(|| format!("Failed to read object {}", digest))?;

    let mut references = ObjectReferences::new();
    object
        .append_references(&mut references)
        .with_context(|| format!("Failed to extract references of {}", digest))?;

    Ok(RefsOutput {
        success: true,
        result_code: 0,
        digest,
        references: references
            .into_iter()
            .map(|(digest, priority)| ReferenceInfo { digest, priority })
            .collect(),
    })
}

fn cmd_refs(root: &Path, digest: &str, output: &OutputWriter) -> Result<()> {
    let store = open_store(root)?;
    let result = object_references(&store, parse_digest(digest)?)?;

    output.write(&result, || {
        if result.references.is_empty() {
            return "No references\n".to_string();
        }
        result
            .references
            .iter()
            .map(|reference| format!("{} {}\n", reference.digest, reference.priority.as_str()))
            .collect()
    })
}

fn collect_all(store: Arc<DiskPieceStore>, digest: ObjectDigest) -> Result<CollectOutput> {
    let chunks = Arc::new(AtomicUsize::new(0));
    let indices = Arc::new(AtomicUsize::new(0));
    let bytes = Arc::new(AtomicU64::new(0));

    let visitor = {
        let chunks = Arc::clone(&chunks);
        let indices = Arc::clone(&indices);
        let bytes = Arc::clone(&bytes);
        move |piece: &dyn Piece| {
            match piece.identifier().digest().piece_type() {
                PieceType::Chunk => {
                    chunks.fetch_add(1, Ordering::Relaxed);
                    bytes.fetch_add(piece.data().len() as u64, Ordering::Relaxed);
                }
                PieceType::Index => {
                    indices.fetch_add(1, Ordering::Relaxed);
                }
            }
            true
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let factory = IdentifierFactory::new();
    let root = factory.identifier_for(digest.clone());
    let status = runtime.block_on(collect_pieces(root, store, visitor));

    let chunks = chunks.load(Ordering::Relaxed);
    let indices = indices.load(Ordering::Relaxed);
    Ok(CollectOutput {
        success: status == IterationStatus::Done,
        result_code: if status == IterationStatus::Done { 0 } else { 1 },
        digest,
        status,
        pieces: chunks + indices,
        chunks,
        indices,
        bytes: bytes.load(Ordering::Relaxed),
    })
}

fn cmd_collect(root: &Path, digest: &str, output: &OutputWriter) -> Result<()> {
    let store = Arc::new(open_store(root)?);
    let digest = parse_digest(digest)?;
    let result = collect_all(store, digest)?;

    output.write(&result, || {
        format!(
            "Collected {} pieces ({} chunks, {} indices, {} bytes)\n",
            result.pieces, result.chunks, result.indices, result.bytes
        )
    })?;
    if result.status != IterationStatus::Done {
        anyhow::bail!("Traversal of {} did not complete", result.digest);
    }
    Ok(())
}

/// Decode a node from a file if `source` names one, otherwise from the store.
fn load_node(root: &Path, source: &str) -> Result<TreeNode> {
    let path = Path::new(source);
    if path.is_file() {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read file {}", path.display()))?;
        return decode_tree_node(&data, None)
            .with_context(|| format!("Failed to decode tree node from {}", path.display()));
    }

    let store = open_store(root)?;
    let digest = parse_digest(source)?;
    let factory = IdentifierFactory::new();
    let object = read_object(&store, &factory.identifier_for(digest.clone()))
        .with_context(|| format!("Failed to read object {}", digest))?;
    object
        .tree_node()
        .with_context(|| format!("Failed to decode tree node {}", digest))
}

fn cmd_inspect_node(root: &Path, source: &str, output: &OutputWriter) -> Result<()> {
    let node = load_node(root, source)?;
    let result = InspectNodeOutput {
        success: true,
        result_code: 0,
        source: source.to_string(),
        node,
    };

    output.write(&result, || {
        let node = &result.node;
        let mut text = format!(
            "Level: {}\nEntries: {}\nChildren: {}\n",
            node.level,
            node.entries.len(),
            node.children.len()
        );
        for entry in &node.entries {
            text.push_str(&format!(
                "  {} -> {} ({})\n",
                String::from_utf8_lossy(&entry.key),
                entry.object_identifier.digest(),
                entry.priority.as_str()
            ));
        }
        for (index, child) in &node.children {
            text.push_str(&format!("  child {} -> {}\n", index, child.digest()));
        }
        text
    })
}

fn cmd_gc(root: &Path, roots: &[String], dry_run: bool, output: &OutputWriter) -> Result<()> {
    let store = open_store(root)?;

    let factory = IdentifierFactory::new();
    let roots = roots
        .iter()
        .map(|digest| parse_digest(digest).map(|digest| factory.identifier_for(digest)))
        .collect::<Result<Vec<_>>>()?;

    let stats = collect_garbage(&store, &roots, dry_run)
        .with_context(|| "Failed to run garbage collection")?;

    let result = GcOutput {
        success: true,
        result_code: 0,
        dry_run,
        pieces_deleted: stats.pieces_deleted,
        bytes_freed: stats.bytes_freed,
    };
    output.write(&result, || {
        if dry_run {
            format!(
                "Dry run - no pieces deleted\nWould delete {} pieces\nWould free {} bytes\n",
                stats.pieces_deleted, stats.bytes_freed
            )
        } else {
            format!(
                "Deleted {} pieces\nFreed {} bytes\n",
                stats.pieces_deleted, stats.bytes_freed
            )
        }
    })
}
