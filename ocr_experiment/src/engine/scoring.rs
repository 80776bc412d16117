// スコア計算 - 信頼度・辞書一致率・埋め込み類似度と順位付け

use crate::core::{SimilarityMatrix, TechniqueScore, WordConfidence};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::Path;

/// 参照辞書（小文字化・前後空白除去済みの単語集合）
pub type Dictionary = HashSet<String>;

/// 辞書ファイルを読み込む（存在しない・読めない場合は空の辞書）
pub fn load_dictionary(path: &Path) -> Dictionary {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_dictionary(&content),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Dictionary unavailable, using empty dictionary");
            Dictionary::new()
        }
    }
}

pub fn parse_dictionary(content: &str) -> Dictionary {
    content
        .lines()
        .map(|line| line.trim().to_lowercase())
        .filter(|word| !word.is_empty())
        .collect()
}

/// 採点対象の単語（空でなく、信頼度が正）
pub fn scored_words(words: &[WordConfidence]) -> impl Iterator<Item = &WordConfidence> {
    words
        .iter()
        .filter(|w| !w.word.trim().is_empty() && w.confidence > 0.0)
}

/// 平均信頼度（0-100 を [0,1] に正規化）
pub fn mean_confidence(words: &[WordConfidence]) -> f64 {
    let (sum, count) = scored_words(words).fold((0.0f64, 0usize), |(sum, count), w| {
        (sum + f64::from(w.confidence), count + 1)
    });
    if count == 0 {
        return 0.0;
    }
    (sum / count as f64 / 100.0).clamp(0.0, 1.0)
}

/// 辞書に含まれる単語の割合（大文字小文字を区別しない）
pub fn dictionary_accuracy(words: &[WordConfidence], dictionary: &Dictionary) -> f64 {
    let mut total = 0usize;
    let mut found = 0usize;
    for word in scored_words(words) {
        total += 1;
        if dictionary.contains(&word.word.trim().to_lowercase()) {
            found += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        found as f64 / total as f64
    }
}

/// コサイン類似度（どちらかがゼロベクトルなら0）
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let len = a.len().min(b.len());
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for i in 0..len {
        let (x, y) = (f64::from(a[i]), f64::from(b[i]));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    // 長さが違う場合、はみ出した成分もノルムに含める
    norm_a += a[len..].iter().map(|v| f64::from(*v).powi(2)).sum::<f64>();
    norm_b += b[len..].iter().map(|v| f64::from(*v).powi(2)).sum::<f64>();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// テクニック間の類似度行列（対称、対角は1または0）
pub fn similarity_matrix(embeddings: &[(String, Vec<f32>)]) -> SimilarityMatrix {
    let n = embeddings.len();
    let mut values = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in i..n {
            let similarity = cosine_similarity(&embeddings[i].1, &embeddings[j].1);
            values[i][j] = similarity;
            values[j][i] = similarity;
        }
    }
    SimilarityMatrix {
        techniques: embeddings.iter().map(|(name, _)| name.clone()).collect(),
        values,
    }
}

/// 自分以外の全テクニックとの類似度の平均（他がなければ0）
pub fn mean_similarity_excluding_self(matrix: &SimilarityMatrix, index: usize) -> f64 {
    let Some(row) = matrix.values.get(index) else {
        return 0.0;
    };
    let others: Vec<f64> = row
        .iter()
        .enumerate()
        .filter(|(j, _)| *j != index)
        .map(|(_, v)| *v)
        .collect();
    if others.is_empty() {
        0.0
    } else {
        others.iter().sum::<f64>() / others.len() as f64
    }
}

/// 順位の比較: 辞書一致率 → 類似度 → 信頼度（いずれも降順）→ 名前（昇順）
pub fn compare_scores(a: &TechniqueScore, b: &TechniqueScore) -> Ordering {
    b.dictionary_accuracy
        .total_cmp(&a.dictionary_accuracy)
        .then_with(|| b.mean_embedding_similarity.total_cmp(&a.mean_embedding_similarity))
        .then_with(|| b.mean_confidence.total_cmp(&a.mean_confidence))
        .then_with(|| a.technique_name.cmp(&b.technique_name))
}

/// スコアを順位順に並べる（先頭が勝者）
pub fn rank(scores: &mut [TechniqueScore]) {
    scores.sort_by(compare_scores);
}
