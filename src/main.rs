use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use log::{LevelFilter, info};
use simplelog::{Config, WriteLogger};

use pagewright::bookmark::{Bookmark, Bookmarks, ReadingPosition};
use pagewright::events::Location;
use pagewright::layout::Flow;
use pagewright::notification::NotificationLevel;
use pagewright::panic_handler;
use pagewright::progress::TocItem;
use pagewright::search::SearchOptions;
use pagewright::session::{OpenOutcome, ReaderSession};
use pagewright::settings;
use pagewright::view::{SearchUpdate, View};
use pagewright::{Target, ViewOptions};

#[derive(Parser)]
#[command(name = "pagewright")]
#[command(version, about = "Paginate, search and navigate e-books from the command line", long_about = None)]
#[command(after_help = "EXAMPLES:
    pagewright pages book/ --count 5      Print the first five page locations
    pagewright goto book/ 40%             Jump to 40% of the book
    pagewright search book/ whale --json  Search, printing JSON hits")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log file
    #[arg(long, global = true, default_value = "pagewright.log")]
    log_file: PathBuf,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    viewport: ViewportArgs,
}

#[derive(Args)]
struct ViewportArgs {
    /// Viewport width in px
    #[arg(long, global = true)]
    width: Option<f64>,

    /// Viewport height in px
    #[arg(long, global = true)]
    height: Option<f64>,

    /// Scroll instead of paginating
    #[arg(long, global = true)]
    scrolled: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Page through a book, printing each location
    Pages {
        path: PathBuf,
        /// Stop after this many pages
        #[arg(short, long)]
        count: Option<usize>,
        /// Start where the last session left off
        #[arg(long)]
        resume: bool,
    },
    /// Go to a CFI, href, section number or fraction (`0.4`, `40%`)
    Goto { path: PathBuf, target: String },
    /// Search the whole book
    Search {
        path: PathBuf,
        query: String,
        #[arg(long)]
        match_case: bool,
        #[arg(long)]
        match_diacritics: bool,
        #[arg(long)]
        whole_words: bool,
    },
    /// Print the table of contents
    Toc { path: PathBuf },
    /// Bookmark a location, or list bookmarks when no target is given
    Bookmark { path: PathBuf, target: Option<String> },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    WriteLogger::init(
        if cli.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        },
        Config::default(),
        File::create(&cli.log_file)
            .with_context(|| format!("creating log file {}", cli.log_file.display()))?,
    )?;
    panic_handler::initialize_panic_handler();
    settings::load_settings();

    info!("Starting pagewright");
    let result = run(&cli);
    info!("Shutting down pagewright");
    result
}

fn view_options(args: &ViewportArgs) -> ViewOptions {
    let mut options = settings::get_settings().view_options();
    if let Some(width) = args.width {
        options.viewport.width = width;
    }
    if let Some(height) = args.height {
        options.viewport.height = height;
    }
    if args.scrolled {
        options.style.flow = Flow::Scrolled;
    }
    options
}

fn bookmarks_path() -> Option<String> {
    dirs::data_dir()
        .map(|dir| dir.join("pagewright").join("bookmarks.json"))
        .map(|path| path.to_string_lossy().into_owned())
}

fn book_id(path: &Path) -> String {
    path.canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

fn open(session: &mut ReaderSession, path: &Path) -> Result<()> {
    let outcome = session
        .open_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    if outcome == OpenOutcome::Busy {
        bail!("another book is still opening");
    }
    Ok(())
}

fn run(cli: &Cli) -> Result<()> {
    let mut session = ReaderSession::new(view_options(&cli.viewport));
    let mut bookmarks = Bookmarks::load_or_ephemeral(bookmarks_path().as_deref());

    match &cli.command {
        Command::Pages {
            path,
            count,
            resume,
        } => {
            open(&mut session, path)?;
            let id = book_id(path);
            let view = session.view_mut();
            let saved = resume
                .then(|| bookmarks.position(&id).map(|p| Target::from(&p.target)))
                .flatten();
            view.init(saved, false);
            let mut last_cfi = None;
            let mut shown = 0;
            while let Some(location) = view.last_location() {
                if last_cfi.as_ref() == Some(&location.cfi) || count.is_some_and(|c| shown >= c) {
                    break;
                }
                print_location(location, cli.json)?;
                last_cfi = Some(location.cfi.clone());
                shown += 1;
                view.next();
            }
            remember(&mut bookmarks, &id, view);
        }
        Command::Goto { path, target } => {
            open(&mut session, path)?;
            let view = session.view_mut();
            if view.go_to(Target::parse(target)).is_none() {
                report_notifications(view);
                bail!("could not go to {target}");
            }
            if let Some(location) = view.last_location() {
                print_location(location, cli.json)?;
            }
            remember(&mut bookmarks, &book_id(path), view);
        }
        Command::Search {
            path,
            query,
            match_case,
            match_diacritics,
            whole_words,
        } => {
            open(&mut session, path)?;
            let defaults = settings::get_search_options();
            let options = SearchOptions {
                match_case: *match_case || defaults.match_case,
                match_diacritics: *match_diacritics || defaults.match_diacritics,
                match_whole_words: *whole_words || defaults.match_whole_words,
                ..defaults
            };
            let mut total = 0;
            for update in session.view_mut().search(query, options, None) {
                match update {
                    SearchUpdate::Section { label, subitems } if !subitems.is_empty() => {
                        total += subitems.len();
                        if cli.json {
                            let line = serde_json::json!({ "label": label, "subitems": subitems });
                            println!("{line}");
                        } else {
                            println!("{label}");
                            for hit in &subitems {
                                let e = &hit.excerpt;
                                println!("  …{}[{}]{}…  {}", e.pre, e.matched, e.post, hit.cfi);
                            }
                        }
                    }
                    SearchUpdate::Hit(hit) => {
                        total += 1;
                        println!("{}", serde_json::to_string(&hit)?);
                    }
                    _ => {}
                }
            }
            if !cli.json {
                println!("{total} matches");
            }
        }
        Command::Toc { path } => {
            open(&mut session, path)?;
            if let Some(book) = session.view().book() {
                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&book.toc)?);
                } else {
                    print_toc(&book.toc, 0);
                }
            }
        }
        Command::Bookmark { path, target } => {
            open(&mut session, path)?;
            let id = book_id(path);
            let Some(target) = target else {
                for bookmark in bookmarks.for_book(&id) {
                    print_bookmark(bookmark, cli.json)?;
                }
                return Ok(());
            };
            let view = session.view_mut();
            if view.go_to(Target::parse(target)).is_none() {
                report_notifications(view);
                bail!("could not go to {target}");
            }
            let bookmark = Bookmark::from_view(view, &id).context("nothing is shown to bookmark")?;
            print_bookmark(&bookmark, cli.json)?;
            bookmarks.add(bookmark);
        }
    }

    report_notifications(session.view());
    Ok(())
}

fn remember(bookmarks: &mut Bookmarks, book_id: &str, view: &View) {
    if let Some(location) = view.last_location() {
        bookmarks.update_position(
            book_id,
            ReadingPosition::from_location(location, view.is_fixed_layout()),
        );
    }
}

fn print_location(location: &Location, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(location)?);
        return Ok(());
    }
    let label = location
        .toc_item
        .as_ref()
        .map(|item| item.label.as_str())
        .unwrap_or("-");
    println!(
        "{:>3} {:>6.1}%  loc {}/{}  {}  {}",
        location.index,
        location.fraction * 100.0,
        location.location.current,
        location.location.total,
        label,
        location.cfi
    );
    Ok(())
}

fn print_bookmark(bookmark: &Bookmark, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(bookmark)?);
    } else {
        println!(
            "{}  {}  {}",
            bookmark.created_at.format("%Y-%m-%d %H:%M"),
            bookmark.label,
            bookmark.snippet.as_deref().unwrap_or_default()
        );
    }
    Ok(())
}

fn print_toc(items: &[TocItem], depth: usize) {
    for item in items {
        println!("{}{}", "  ".repeat(depth), item.label);
        print_toc(&item.subitems, depth + 1);
    }
}

fn report_notifications(view: &View) {
    for notification in view.notifications().all().iter().rev() {
        if notification.level != NotificationLevel::Info {
            eprintln!("{}: {notification}", notification.level);
        }
    }
}
