//! ダウンロードキュー構築
//!
//! 収集結果を1ファイル1エントリのキューに変換する。
//! ファイル名はグループ番号ベース（`{groupId}-{kind}{ext}`）でページ上の並びと一致させる。

pub mod rewrite;

pub use rewrite::to_original_url;

use media_harvest_common::{derive_extension, GalleryItem, QueueItem, UsedNames};

pub fn prepare_queue(items: &[GalleryItem], session_folder: &str) -> Vec<QueueItem> {
    let mut used = UsedNames::new();
    let folder = session_folder.trim_end_matches('/');

    let queue: Vec<QueueItem> = items
        .iter()
        .map(|item| {
            let url = to_original_url(&item.url);
            let extension = derive_extension(item.kind, &url);
            let base = format!("{}-{}", item.group_id, item.kind);
            let unique = used.claim(&format!("{}{}", base, extension));

            QueueItem {
                url,
                kind: item.kind,
                filename: if folder.is_empty() {
                    unique.clone()
                } else {
                    format!("{}/{}", folder, unique)
                },
                label: unique,
                group_id: item.group_id,
            }
        })
        .collect();

    tracing::debug!(files = queue.len(), session = folder, "download queue prepared");
    queue
}

#[cfg(test)]
mod tests {
    use super::*;
    use media_harvest_common::MediaKind;

    fn item(url: &str, kind: MediaKind, group_id: u32) -> GalleryItem {
        GalleryItem {
            url: url.to_string(),
            kind,
            poster_url: None,
            group_id,
        }
    }

    #[test]
    fn test_filenames_follow_group_and_kind() {
        let items = vec![
            item("https://assets.grok.com/u/generated/a/preview_image.jpg", MediaKind::Image, 1),
            item("https://assets.grok.com/u/generated/a/generated_video.mp4", MediaKind::Video, 1),
            item("https://assets.grok.com/u/generated/b/content", MediaKind::Video, 2),
        ];
        let queue = prepare_queue(&items, "harvest-session/2026-01-01_00-00-00");

        assert_eq!(queue[0].filename, "harvest-session/2026-01-01_00-00-00/1-image.png");
        assert_eq!(queue[0].url, "https://assets.grok.com/u/generated/a/image.png");
        assert_eq!(queue[1].label, "1-video.mp4");
        assert_eq!(queue[2].label, "2-video.mp4");
        assert_eq!(queue[2].group_id, 2);
    }

    #[test]
    fn test_collision_gets_numeric_suffix() {
        let items = vec![
            item("https://x.example/generated/a.png", MediaKind::Image, 3),
            item("https://x.example/generated/b.png", MediaKind::Image, 3),
        ];
        let queue = prepare_queue(&items, "s");
        assert_eq!(queue[0].label, "3-image.png");
        assert_eq!(queue[1].label, "3-image-2.png");
        assert_eq!(queue[1].filename, "s/3-image-2.png");
    }
}
