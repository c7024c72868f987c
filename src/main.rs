use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use media_harvest::cli::{Cli, Commands};
use media_harvest::collector::{CollectOutcome, CollectRequest, Collector};
use media_harvest::config::Config;
use media_harvest::logging;
use media_harvest::orchestrator::{Orchestrator, StartOptions, StartResponse, StatusObserver};
use media_harvest::surface::{HtmlGallery, HtmlGalleryOptions};
use media_harvest::transfer::HttpTransfer;
use media_harvest_common::{load_items, save_items, StatusEvent, StatusState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose).context("ログの初期化に失敗しました")?;
    let config = Config::load().context("設定ファイルの読み込みに失敗しました")?;

    match cli.command {
        Commands::Run {
            page,
            items,
            limit,
            media,
            debug,
            dest,
        } => {
            println!("📥 media-harvest - 一括ダウンロード\n");
            let options = StartOptions::lenient(debug, limit, &media);
            let destination = dest.unwrap_or_else(|| config.resolve_destination());
            println!("- 保存先: {}", destination.display());

            let transfer = HttpTransfer::new(&destination, &config.user_agent)
                .context("HTTPクライアントの初期化に失敗しました")?;
            let orchestrator = Orchestrator::new(
                config.orchestrator(),
                Collector::new(config.collector()),
                Arc::new(transfer),
            );

            let (tx, mut rx) = mpsc::unbounded_channel::<StatusEvent>();
            let observer: Arc<dyn StatusObserver> = Arc::new(tx);
            let mut view = StatusView::new();

            let response = match (page, items) {
                (_, Some(items_path)) => {
                    let items = load_items(&items_path)
                        .with_context(|| format!("一覧の読み込みに失敗しました: {}", items_path.display()))?;
                    println!("✔ {}件の一覧を読み込みました\n", items.len());
                    orchestrator.start_with_items(items, options, Some(observer))
                }
                (Some(page), None) => {
                    let mut gallery = open_gallery(&page, &config).await?;
                    let start = orchestrator.start(Some(&mut gallery), options, Some(observer));
                    tokio::pin!(start);
                    loop {
                        tokio::select! {
                            response = &mut start => break response,
                            Some(event) = rx.recv() => view.render(&event),
                        }
                    }
                }
                (None, None) => bail!("--page か --items を指定してください"),
            };

            match response {
                StartResponse::Started { total } => {
                    view.begin(total);
                    loop {
                        tokio::select! {
                            _ = orchestrator.wait_idle() => break,
                            Some(event) = rx.recv() => view.render(&event),
                        }
                    }
                    while let Ok(event) = rx.try_recv() {
                        view.render(&event);
                    }
                    view.finish();
                }
                other => {
                    while let Ok(event) = rx.try_recv() {
                        view.render(&event);
                    }
                    view.finish();
                    bail!("開始できませんでした: {}", describe_rejection(&other));
                }
            }

            let summary = orchestrator
                .last_summary()
                .context("実行結果が取得できませんでした")?;
            println!("\n- 成功: {} / {}", summary.successes, summary.total);
            println!("- 保存先: {}", destination.join(&summary.session_folder).display());

            if !summary.permanent_failures.is_empty() {
                for name in &summary.permanent_failures {
                    println!("  ✖ {}", name);
                }
                bail!("{}件のファイルをダウンロードできませんでした", summary.permanent_failures.len());
            }
            println!("\n✅ 完了");
        }

        Commands::Collect {
            page,
            limit,
            media,
            debug,
            output,
        } => {
            println!("🔍 media-harvest - 収集\n");
            let options = StartOptions::lenient(debug, limit, &media);
            let mut gallery = open_gallery(&page, &config).await?;
            let collector = Collector::new(config.collector());
            let request = CollectRequest {
                limit: options.limit,
                filter: options.media,
                debug: options.debug,
            };

            let outcome = collector.collect(&mut gallery, &request).await;
            for line in outcome.trace() {
                println!("  · {}", line);
            }

            match outcome {
                CollectOutcome::Ready { mut items, .. } => {
                    if options.limit > 0 {
                        items.truncate(options.limit);
                    }
                    save_items(&output, &items)
                        .with_context(|| format!("一覧の保存に失敗しました: {}", output.display()))?;
                    println!("✔ {}件のメディアを収集 ({}ページ)", items.len(), gallery.pages_loaded());
                    println!("✔ 一覧を保存: {}", output.display());
                    println!("\n✅ 収集完了");
                }
                CollectOutcome::NotReady { message, .. } => bail!(message),
            }
        }

        Commands::Config { set_destination, show } => {
            let mut config = config;

            if let Some(path) = set_destination {
                config
                    .set_destination(path.clone())
                    .context("設定の保存に失敗しました")?;
                println!("✔ 保存先を設定しました: {}", path.display());
            }

            if show {
                println!("設定:");
                println!("  保存先: {}", config.resolve_destination().display());
                println!("  セッションフォルダ: {}", config.session_root);
                println!("  リトライ上限: {}", config.max_retries);
                println!("  リトライ間隔: {}ms", config.retry_delay_ms);
                println!("  ダウンロード間隔: {}ms", config.download_delay_ms);
                println!("  タイムアウト: {}ms", config.download_timeout_ms);
                println!("  対象URL: {}", if config.target_marker.is_empty() { "(制限なし)" } else { config.target_marker.as_str() });
                if let Ok(path) = Config::config_path() {
                    println!("  設定ファイル: {}", path.display());
                }
            }
        }
    }

    Ok(())
}

async fn open_gallery(page: &str, config: &Config) -> Result<HtmlGallery> {
    let options = HtmlGalleryOptions {
        viewport_height: config.viewport_height,
        user_agent: config.user_agent.clone(),
        ..HtmlGalleryOptions::default()
    };
    println!("- ページを読み込み中: {}", page);
    HtmlGallery::open(page, options)
        .await
        .with_context(|| format!("ページを開けませんでした: {}", page))
}

fn describe_rejection(response: &StartResponse) -> String {
    match response {
        StartResponse::Busy => "別の実行が進行中です".into(),
        StartResponse::NeedTarget => "対象ページがありません".into(),
        StartResponse::Empty => "ダウンロードできるメディアが見つかりません".into(),
        StartResponse::Error { message } => message.clone(),
        StartResponse::Started { total } => format!("{}件開始済み", total),
    }
}

/// ステータスイベントを進捗バーとログ行で表示する
struct StatusView {
    bar: ProgressBar,
}

impl StatusView {
    fn new() -> Self {
        let bar = ProgressBar::hidden();
        Self { bar }
    }

    fn begin(&mut self, total: usize) {
        let style = ProgressStyle::default_bar()
            .template("{spinner} [{bar:40}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        self.bar.set_style(style);
        self.bar.set_length(total as u64);
        self.bar.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));
        self.bar.enable_steady_tick(Duration::from_millis(200));
    }

    fn render(&self, event: &StatusEvent) {
        if let Some(progress) = event.progress {
            if progress.total > 0 {
                self.bar.set_length(progress.total as u64);
                self.bar.set_position(progress.completed as u64);
            }
        }

        let line = match event.state {
            StatusState::Debug => format!("  · {}", event.text),
            StatusState::Error => format!("⚠ {}", event.text),
            StatusState::Running | StatusState::Idle => event.text.clone(),
        };
        if self.bar.is_hidden() {
            println!("{}", line);
        } else {
            self.bar.println(line);
        }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

