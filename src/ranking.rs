use crate::database::FilmDb;
use crate::error::{Error, Result};
use crate::model::Film;
use log::debug;
use std::cmp::Reverse;

pub const DEFAULT_POPULAR_COUNT: i64 = 10;

/// Orders films by like count, most liked first, then by name and id so that
/// equal counts always come out in the same order.
pub fn rank(mut films: Vec<Film>, count: usize) -> Vec<Film> {
    films.sort_by(|a, b| {
        (Reverse(a.likes.len()), &a.name, a.id).cmp(&(Reverse(b.likes.len()), &b.name, b.id))
    });
    films.truncate(count);
    films
}

pub trait RankingDb {
    fn get_top_films(&self, count: i64) -> Result<Vec<Film>>;
}

impl RankingDb for sled::Db {
    fn get_top_films(&self, count: i64) -> Result<Vec<Film>> {
        if count <= 0 {
            return Err(Error::InvalidArgument(format!(
                "count must be positive, got {}",
                count
            )));
        }
        let count = usize::try_from(count).unwrap_or(usize::MAX);
        let films = self.get_films()?;
        debug!("ranking {} films, keeping {}", films.len(), count);
        Ok(rank(films, count))
    }
}
