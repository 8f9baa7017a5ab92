/*!
**A utility for cataloguing a game-download listing site**

## Usage

- Basic Run:
```sh
ripcat -c hydrasteam.json
```

- With Logging:
```sh
ripcat -c hydrasteam.json -l ripcat.log
```

- Verbose Mode (Log Every Resolved Link):
```sh
ripcat -c hydrasteam.json -v
```

- From a Saved Listing Page:
```sh
ripcat --local-html games-list-page.html
```

- Quick Sample Without Following Mirror Pages:
```sh
ripcat -n 20 --no-resolve
```

- Paginated Copies and Git Push:
```sh
ripcat --split-dir split --per-page 50 --git
```

---

## Output Format

The catalog and both published partitions share one shape:
```json
{
    "name": "SteamRip",
    "downloads": [
        {
            "title": "Hades",
            "uploadDate": "2020-09-17",
            "fileSize": "15 GB",
            "uris": [
                "https://buzzheavier.com/f/hades"
            ]
        }
    ]
}
```

- `<stem>_primary.json`: records with links on the preferred host, restricted to those links
- `<stem>_broad.json`: every other link, plus records with no links at all

---

## How It Works

1. Discovery:
- Reads the listing page (live or a local snapshot)
- Tries listing selectors in order, then any link inside a content container
- Keeps same-site links, drops pagination, category and tag pages

2. Extraction:
- Title, upload date, file size and mirror links each have a fallback chain
- A page without a title is skipped; missing fields become `"Unknown"`

3. Resolution:
- Mirror landing pages on known hosts are followed to a direct link
- Any failure (including 403) keeps the original link

4. Reconciliation:
- Records are keyed by case-insensitive title
- Each page is classified as new, updated or unchanged

5. Pacing & Checkpoints:
- One page at a time, with a delay that grows with the error count
- The catalog is saved every 10 new games, at the end, and on Ctrl+C

---

## Logging

#### Log Levels:

- **DEBUG** (verbose mode only): Resolved links, unchanged games
- **INFO** (always): Progress and run summary
- **WARN** (always): Fallbacks, missing fields, page and resolver failures
- **FATAL** (always): Unrecoverable errors (unreachable listing page, bad arguments)

#### Log Format:

```text
2026-01-24 02:37:40.351 [INFO]:
Processing 3/812: https://steamrip.com/hades-free-download/

2026-01-24 02:37:41.123 [WARN]:
Used fallback #2 (page <title>) for title on https://steamrip.com/hades-free-download/
```

---

## Limitations

- No JavaScript rendering (static HTML only)
- Sequential by design, one request in flight

*/

use std::process::ExitCode;

use clap::Parser;
use owo_colors::OwoColorize;

mod cli;
mod crawler;
mod date;
mod error;
mod extract;
mod fetch;
mod output;
mod reconcile;
mod record;
mod repo;
mod resolve;
mod vcs;

use crate::crawler::{Crawler, RunEnd, interrupt_on_ctrl_c};
use crate::error::{INFO, Log, Res, WARN, configure_logger};
use crate::fetch::HttpSource;
use crate::repo::JsonFileRepo;
use crate::resolve::Resolver;

async fn run(args: cli::Args) -> Res<RunEnd> {
    let source = HttpSource::new(&args.http_config())?;
    let repo = JsonFileRepo::new(&args.catalog, &args.name);
    let resolver = args.resolver_config()?.map(Resolver::new).transpose()?;
    let crawler = Crawler::new(&source, &repo, resolver, args.crawl_config()?)?;

    let report = crawler.run(interrupt_on_ctrl_c()).await?;

    match report.end {
        RunEnd::Completed => {}
        RunEnd::Interrupted => {
            String::from("Stopped by interrupt").log(WARN).await?;
            return Ok(report.end);
        }
        RunEnd::NothingDiscovered => return Ok(report.end),
    }

    let publish = args.publish_config();
    let written = output::publish(&report.catalog, &publish).await?;

    if args.git {
        let mut files = vec![repo.path().to_path_buf()];
        files.extend(written);
        files.extend(publish.split_dir.clone());

        let message = vcs::commit_message(report.stats.new, report.stats.updated);
        vcs::publish_to_git(&files, &message).await?;
    }

    String::from("Scraper finished").log(INFO).await?;

    Ok(report.end)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::Args::parse();
    configure_logger(args.log_file.clone(), args.verbose);

    match run(args).await {
        Ok(RunEnd::Interrupted) => ExitCode::from(130),
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "FATAL:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
