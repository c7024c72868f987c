//! プレビューURLをオリジナル解像度のURLへ変換
//!
//! - imagine-public.x.ai: `/cdn-cgi/image/<options>/` のリサイズプロキシ部分を除去
//! - assets.grok.com: `/preview_image.jpg` を `/image.png` に置換
//!
//! どちらにも一致しないURLはそのまま返す。

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref RESIZE_PROXY_SEGMENT: Regex =
        Regex::new(r"/cdn-cgi/image/[^/]+/").expect("resize proxy pattern");
}

const PROXY_HOST: &str = "imagine-public.x.ai";
const PREVIEW_HOST: &str = "assets.grok.com";
const PREVIEW_FILE: &str = "/preview_image.jpg";
const ORIGINAL_FILE: &str = "/image.png";

pub fn to_original_url(url: &str) -> String {
    if url.is_empty() {
        return String::new();
    }

    if url.contains(PROXY_HOST) && url.contains("/cdn-cgi/image/") {
        return RESIZE_PROXY_SEGMENT.replace(url, "/").into_owned();
    }

    if url.contains(PREVIEW_HOST) && url.contains(PREVIEW_FILE) {
        return url.replacen(PREVIEW_FILE, ORIGINAL_FILE, 1);
    }

    url.to_string()
}
