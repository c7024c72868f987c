//! コンテナ単位のグループ化と番号付け

use media_harvest_common::{CollectedItem, GalleryItem};
use std::collections::BTreeMap;

/// コンテナIDでまとめ、初出順に1始まりのグループ番号を振る
///
/// 同じコンテナ内の画像・動画は同じ番号になる。
pub fn group_items(items: &[CollectedItem]) -> Vec<GalleryItem> {
    group_by_container(items)
        .into_values()
        .enumerate()
        .flat_map(|(index, group)| {
            let group_id = index as u32 + 1;
            group.into_iter().map(move |item| GalleryItem {
                url: item.url.clone(),
                kind: item.kind,
                poster_url: item.poster_url.clone(),
                group_id,
            })
        })
        .collect()
}

/// グループサイズの分布（サイズ → グループ数）
pub fn group_size_distribution(items: &[CollectedItem]) -> BTreeMap<usize, usize> {
    let mut distribution = BTreeMap::new();
    for group in group_by_container(items).values() {
        *distribution.entry(group.len()).or_insert(0) += 1;
    }
    distribution
}

pub fn group_count(items: &[CollectedItem]) -> usize {
    group_by_container(items).len()
}

fn group_by_container(items: &[CollectedItem]) -> BTreeMap<u32, Vec<&CollectedItem>> {
    let mut groups: BTreeMap<u32, Vec<&CollectedItem>> = BTreeMap::new();
    for item in items {
        groups.entry(item.container_id).or_default().push(item);
    }
    groups
}
