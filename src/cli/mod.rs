pub mod build_corpus;
pub mod refresh_movies;
