use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use super::corpus::Corpus;

pub const TRAINING_FILE: &str = "training_data.csv";
pub const REVIEW_COUNTS_FILE: &str = "review_counts.csv";
pub const MOVIE_DATA_FILE: &str = "movie_data.csv";
pub const MOVIE_LIST_FILE: &str = "threshold_movie_list.json";

#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactPaths {
    pub training: PathBuf,
    pub review_counts: PathBuf,
    pub movie_data: PathBuf,
    pub movie_list: PathBuf,
}

/// Header row comes from the field names of `T`.
pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<usize> {
    let mut wtr = csv::Writer::from_path(path).with_context(|| format!("open {}", path.display()))?;
    for row in rows {
        wtr.serialize(row)
            .with_context(|| format!("write row to {}", path.display()))?;
    }
    wtr.flush()
        .with_context(|| format!("flush {}", path.display()))?;
    Ok(rows.len())
}

pub fn write_id_list(path: &Path, ids: &[String]) -> Result<()> {
    let body = serde_json::to_string_pretty(ids).context("serialize movie id list")?;
    fs::write(path, body).with_context(|| format!("write {}", path.display()))
}

pub fn write_corpus(dir: &Path, corpus: &Corpus) -> Result<ArtifactPaths> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let paths = ArtifactPaths {
        training: dir.join(TRAINING_FILE),
        review_counts: dir.join(REVIEW_COUNTS_FILE),
        movie_data: dir.join(MOVIE_DATA_FILE),
        movie_list: dir.join(MOVIE_LIST_FILE),
    };

    let training = write_csv(&paths.training, &corpus.training)?;
    let counts = write_csv(&paths.review_counts, &corpus.review_counts)?;
    let movies = write_csv(&paths.movie_data, &corpus.movies)?;
    write_id_list(&paths.movie_list, &corpus.retained_ids)?;

    info!(
        dir = %dir.display(),
        training,
        counts,
        movies,
        retained = corpus.retained_ids.len(),
        "corpus artifacts written"
    );
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::corpus::MovieDataRow;
    use crate::database_ops::models::{RatingRecord, ReviewCount};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("film-harvest-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn writes_all_four_artifacts() {
        let dir = scratch_dir("artifacts");
        let corpus = Corpus {
            training: vec![RatingRecord {
                user_id: "ann".into(),
                movie_id: "heat".into(),
                rating_val: 8,
            }],
            review_counts: vec![ReviewCount {
                movie_id: "heat".into(),
                count: 31,
            }],
            movies: vec![MovieDataRow {
                movie_id: "heat".into(),
                image_url: "film-poster/heat".into(),
                movie_title: Some("Heat".into()),
                year_released: Some(1995),
            }],
            retained_ids: vec!["heat".into()],
        };

        let paths = write_corpus(&dir, &corpus).unwrap();

        let training = fs::read_to_string(&paths.training).unwrap();
        assert_eq!(training, "user_id,movie_id,rating_val\nann,heat,8\n");
        let counts = fs::read_to_string(&paths.review_counts).unwrap();
        assert_eq!(counts, "movie_id,count\nheat,31\n");
        let movies = fs::read_to_string(&paths.movie_data).unwrap();
        assert!(movies.starts_with("movie_id,image_url,movie_title,year_released\n"));
        let ids: Vec<String> =
            serde_json::from_str(&fs::read_to_string(&paths.movie_list).unwrap()).unwrap();
        assert_eq!(ids, vec!["heat".to_string()]);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_title_is_an_empty_cell() {
        let dir = scratch_dir("empty-cell");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("m.csv");
        let rows = vec![MovieDataRow {
            movie_id: "x".into(),
            image_url: String::new(),
            movie_title: None,
            year_released: Some(2001),
        }];
        write_csv(&path, &rows).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "movie_id,image_url,movie_title,year_released\nx,,,2001\n"
        );
        let _ = fs::remove_dir_all(&dir);
    }
}
