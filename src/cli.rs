use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "media-harvest")]
#[command(about = "仮想スクロールギャラリーのメディア一括ダウンロードツール", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 詳細ログを出力
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// ギャラリーを収集してダウンロード
    Run {
        /// ギャラリーページ（HTMLファイルまたはURL）
        #[arg(short, long, required_unless_present = "items", conflicts_with = "items")]
        page: Option<String>,

        /// collect で保存した一覧JSON（収集を省略）
        #[arg(short, long)]
        items: Option<PathBuf>,

        /// 最大件数（0 = 無制限）
        #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
        limit: i64,

        /// 対象メディア (all/image/video)
        #[arg(short, long, default_value = "all")]
        media: String,

        /// 判断トレースを表示
        #[arg(long)]
        debug: bool,

        /// 保存先ルート（デフォルト: 設定値またはダウンロードフォルダ）
        #[arg(long)]
        dest: Option<PathBuf>,
    },

    /// ギャラリーを収集して一覧JSONを出力
    Collect {
        /// ギャラリーページ（HTMLファイルまたはURL）
        #[arg(short, long, required = true)]
        page: String,

        /// 最大件数（0 = 無制限）
        #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
        limit: i64,

        /// 対象メディア (all/image/video)
        #[arg(short, long, default_value = "all")]
        media: String,

        /// 判断トレースを表示
        #[arg(long)]
        debug: bool,

        /// 出力JSONファイル
        #[arg(short, long, default_value = "items.json")]
        output: PathBuf,
    },

    /// 設定を管理
    Config {
        /// 保存先ルートを設定
        #[arg(long)]
        set_destination: Option<PathBuf>,

        /// 現在の設定を表示
        #[arg(long)]
        show: bool,
    },
}
