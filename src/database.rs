use crate::error::{settle, Entity, Error, Result};
use crate::model::*;
use crate::relations;
use crate::validation::{self, Lookup};
use chrono::NaiveDate;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sled::transaction::{abort, ConflictableTransactionResult};
use std::collections::BTreeSet;
use std::path::Path;

pub(crate) const USERS: &[u8] = b"users";
pub(crate) const FILMS: &[u8] = b"films";
pub(crate) const USER_FRIENDS: &[u8] = b"user_friends";
pub(crate) const FILM_LIKES: &[u8] = b"film_likes";
pub(crate) const USER_LIKES: &[u8] = b"user_likes";
const MPA: &[u8] = b"mpa";
const GENRES: &[u8] = b"genres";
const IDS: &[u8] = b"ids";

type TxResult<T> = ConflictableTransactionResult<T, Error>;

const MPA_SEED: &[(Id, &str)] = &[(1, "G"), (2, "PG"), (3, "PG-13"), (4, "R"), (5, "NC-17")];
const GENRE_SEED: &[(Id, &str)] = &[
    (1, "Comedy"),
    (2, "Drama"),
    (3, "Animation"),
    (4, "Thriller"),
    (5, "Documentary"),
    (6, "Action"),
];

// Big-endian so that tree order is numeric order.
pub(crate) fn id_key(id: Id) -> [u8; 8] {
    id.to_be_bytes()
}

pub(crate) fn edge_key(from: Id, to: Id) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&id_key(from));
    key.extend_from_slice(&id_key(to));
    key
}

pub(crate) fn decode_id<V: AsRef<[u8]>>(bytes: V) -> Result<Id> {
    let bytes = bytes.as_ref();
    <[u8; 8]>::try_from(bytes)
        .map(Id::from_be_bytes)
        .map_err(|_| Error::Corrupt(format!("bad id of {} bytes", bytes.len())))
}

/// Targets of all edges leaving `from`, in ascending order.
pub(crate) fn edge_targets(edges: &sled::Tree, from: Id) -> Result<Vec<Id>> {
    edges
        .scan_prefix(id_key(from))
        .keys()
        .map(|key| decode_id(&key?[8..]))
        .collect()
}

/// Opens the store at `path`, or a throwaway one, and seeds the lookup tables.
pub fn open(path: Option<&Path>) -> Result<sled::Db> {
    let config = match path {
        Some(path) => sled::Config::new().path(path),
        None => sled::Config::new().temporary(true),
    };
    let db = config.open()?;
    db.seed_catalog()?;
    Ok(db)
}

fn next_id(db: &sled::Db, entity: Entity) -> Result<Id> {
    let ids = db.open_tree(IDS)?;
    let next = ids.update_and_fetch(entity.to_string(), |old| {
        let current = old
            .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
            .map(Id::from_be_bytes)
            .unwrap_or(0);
        Some(id_key(current + 1).to_vec())
    })?;
    next.ok_or_else(|| Error::Corrupt(format!("{} id counter vanished", entity)))
        .and_then(decode_id)
}

fn named_rows(tree: &sled::Tree) -> Result<Vec<(Id, String)>> {
    tree.iter()
        .map(|item| {
            let (key, value) = item?;
            Ok((decode_id(&key)?, decode_name(&value)?))
        })
        .collect()
}

fn decode_name(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| Error::Corrupt(e.to_string()))
}

pub trait CatalogDb {
    fn seed_catalog(&self) -> Result<()>;
    fn get_mpa(&self, id: Id) -> Result<Mpa>;
    fn get_all_mpa(&self) -> Result<Vec<Mpa>>;
    fn get_genre(&self, id: Id) -> Result<Genre>;
    fn get_genres(&self) -> Result<Vec<Genre>>;
}

impl CatalogDb for sled::Db {
    fn seed_catalog(&self) -> Result<()> {
        for (name, rows) in [(MPA, MPA_SEED), (GENRES, GENRE_SEED)] {
            let tree = self.open_tree(name)?;
            for (id, value) in rows {
                if !tree.contains_key(id_key(*id))? {
                    tree.insert(id_key(*id), value.as_bytes())?;
                }
            }
        }
        Ok(())
    }

    fn get_mpa(&self, id: Id) -> Result<Mpa> {
        let name = self
            .open_tree(MPA)?
            .get(id_key(id))?
            .ok_or_else(|| Error::not_found(Entity::Mpa, id))?;
        Ok(Mpa {
            id,
            name: decode_name(&name)?,
        })
    }

    fn get_all_mpa(&self) -> Result<Vec<Mpa>> {
        Ok(named_rows(&self.open_tree(MPA)?)?
            .into_iter()
            .map(|(id, name)| Mpa { id, name })
            .collect())
    }

    fn get_genre(&self, id: Id) -> Result<Genre> {
        let name = self
            .open_tree(GENRES)?
            .get(id_key(id))?
            .ok_or_else(|| Error::not_found(Entity::Genre, id))?;
        Ok(Genre {
            id,
            name: decode_name(&name)?,
        })
    }

    fn get_genres(&self) -> Result<Vec<Genre>> {
        Ok(named_rows(&self.open_tree(GENRES)?)?
            .into_iter()
            .map(|(id, name)| Genre { id, name })
            .collect())
    }
}

impl Lookup for sled::Db {
    fn has_mpa(&self, id: Id) -> Result<bool> {
        Ok(self.open_tree(MPA)?.contains_key(id_key(id))?)
    }

    fn has_genre(&self, id: Id) -> Result<bool> {
        Ok(self.open_tree(GENRES)?.contains_key(id_key(id))?)
    }
}

#[derive(Serialize, Deserialize, Debug)]
struct UserRow {
    name: String,
    email: String,
    login: String,
    birthday: Option<NaiveDate>,
}

impl UserRow {
    fn from_user(user: User) -> Self {
        let name = if user.name.trim().is_empty() {
            user.login.clone()
        } else {
            user.name
        };
        UserRow {
            name,
            email: user.email,
            login: user.login,
            birthday: user.birthday,
        }
    }

    fn into_user(self, id: Id, friends: Vec<Id>) -> User {
        User {
            id,
            email: self.email,
            login: self.login,
            name: self.name,
            birthday: self.birthday,
            friends,
        }
    }
}

pub trait UserDb {
    fn add_user(&self, user: User) -> Result<User>;
    fn update_user(&self, id: Id, user: User) -> Result<User>;
    fn get_user(&self, id: Id) -> Result<User>;
    fn get_users(&self) -> Result<Vec<User>>;
    fn delete_user(&self, id: Id) -> Result<()>;
}

impl UserDb for sled::Db {
    fn add_user(&self, user: User) -> Result<User> {
        validation::validate_user(&user, validation::today())?;
        let row = UserRow::from_user(user);
        let bytes = bincode::serialize(&row)?;
        let id = next_id(self, Entity::User)?;
        self.open_tree(USERS)?.insert(id_key(id), bytes)?;
        info!("added user {} ({})", id, row.login);
        Ok(row.into_user(id, Vec::new()))
    }

    fn update_user(&self, id: Id, user: User) -> Result<User> {
        validation::validate_user(&user, validation::today())?;
        let bytes = bincode::serialize(&UserRow::from_user(user))?;
        let users = self.open_tree(USERS)?;
        settle(users.transaction(|users| {
            if users.get(id_key(id))?.is_none() {
                return abort(Error::not_found(Entity::User, id));
            }
            users.insert(id_key(id).to_vec(), bytes.clone())?;
            Ok(())
        }))?;
        info!("updated user {}", id);
        self.get_user(id)
    }

    fn get_user(&self, id: Id) -> Result<User> {
        debug!("get user {}", id);
        let bytes = self
            .open_tree(USERS)?
            .get(id_key(id))?
            .ok_or_else(|| Error::not_found(Entity::User, id))?;
        let row: UserRow = bincode::deserialize(&bytes)?;
        let friends = edge_targets(&self.open_tree(USER_FRIENDS)?, id)?;
        Ok(row.into_user(id, friends))
    }

    fn get_users(&self) -> Result<Vec<User>> {
        let friends = self.open_tree(USER_FRIENDS)?;
        self.open_tree(USERS)?
            .iter()
            .map(|item| {
                let (key, value) = item?;
                let id = decode_id(&key)?;
                let row: UserRow = bincode::deserialize(&value)?;
                Ok(row.into_user(id, edge_targets(&friends, id)?))
            })
            .collect()
    }

    fn delete_user(&self, id: Id) -> Result<()> {
        let users = self.open_tree(USERS)?;
        let removed = settle(users.transaction(|users| -> TxResult<bool> {
            Ok(users.remove(id_key(id).to_vec())?.is_some())
        }))?;
        // Sweep even when the record is gone, so a retry after an interrupted
        // sweep still clears the remaining edges.
        relations::sweep_user(self, id)?;
        if !removed {
            return Err(Error::not_found(Entity::User, id));
        }
        info!("deleted user {}", id);
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug)]
struct FilmRow {
    name: String,
    description: String,
    release_date: NaiveDate,
    duration: i64,
    mpa_id: Id,
    genre_ids: Vec<Id>,
}

impl FilmRow {
    /// Expects a film that already passed validation.
    fn from_film(film: Film) -> Result<Self> {
        let missing = |field: &str| Error::Validation(vec![format!("{} is required", field)]);
        Ok(FilmRow {
            release_date: film.release_date.ok_or_else(|| missing("release date"))?,
            mpa_id: film.mpa.map(|mpa| mpa.id).ok_or_else(|| missing("mpa rating"))?,
            genre_ids: film
                .genres
                .iter()
                .map(|genre| genre.id)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            name: film.name,
            description: film.description,
            duration: film.duration,
        })
    }
}

pub trait FilmDb {
    fn add_film(&self, film: Film) -> Result<Film>;
    fn update_film(&self, id: Id, film: Film) -> Result<Film>;
    fn get_film(&self, id: Id) -> Result<Film>;
    fn get_films(&self) -> Result<Vec<Film>>;
    fn delete_film(&self, id: Id) -> Result<()>;
}

fn assemble_film(db: &sled::Db, id: Id, row: FilmRow, likes: &sled::Tree) -> Result<Film> {
    Ok(Film {
        id,
        name: row.name,
        description: row.description,
        release_date: Some(row.release_date),
        duration: row.duration,
        mpa: Some(db.get_mpa(row.mpa_id)?),
        genres: row
            .genre_ids
            .into_iter()
            .map(|genre_id| db.get_genre(genre_id))
            .collect::<Result<_>>()?,
        likes: edge_targets(likes, id)?,
    })
}

impl FilmDb for sled::Db {
    fn add_film(&self, film: Film) -> Result<Film> {
        validation::validate_film(&film, self)?;
        let row = FilmRow::from_film(film)?;
        let bytes = bincode::serialize(&row)?;
        let id = next_id(self, Entity::Film)?;
        self.open_tree(FILMS)?.insert(id_key(id), bytes)?;
        info!("added film {} ({})", id, row.name);
        assemble_film(self, id, row, &self.open_tree(FILM_LIKES)?)
    }

    fn update_film(&self, id: Id, film: Film) -> Result<Film> {
        validation::validate_film(&film, self)?;
        let bytes = bincode::serialize(&FilmRow::from_film(film)?)?;
        let films = self.open_tree(FILMS)?;
        settle(films.transaction(|films| {
            if films.get(id_key(id))?.is_none() {
                return abort(Error::not_found(Entity::Film, id));
            }
            films.insert(id_key(id).to_vec(), bytes.clone())?;
            Ok(())
        }))?;
        info!("updated film {}", id);
        self.get_film(id)
    }

    fn get_film(&self, id: Id) -> Result<Film> {
        debug!("get film {}", id);
        let bytes = self
            .open_tree(FILMS)?
            .get(id_key(id))?
            .ok_or_else(|| Error::not_found(Entity::Film, id))?;
        assemble_film(
            self,
            id,
            bincode::deserialize(&bytes)?,
            &self.open_tree(FILM_LIKES)?,
        )
    }

    fn get_films(&self) -> Result<Vec<Film>> {
        let likes = self.open_tree(FILM_LIKES)?;
        self.open_tree(FILMS)?
            .iter()
            .map(|item| {
                let (key, value) = item?;
                assemble_film(self, decode_id(&key)?, bincode::deserialize(&value)?, &likes)
            })
            .collect()
    }

    fn delete_film(&self, id: Id) -> Result<()> {
        let films = self.open_tree(FILMS)?;
        let removed = settle(films.transaction(|films| -> TxResult<bool> {
            Ok(films.remove(id_key(id).to_vec())?.is_some())
        }))?;
        // Sweep even when the record is gone, so a retry after an interrupted
        // sweep still clears the remaining edges.
        relations::sweep_film(self, id)?;
        if !removed {
            return Err(Error::not_found(Entity::Film, id));
        }
        info!("deleted film {}", id);
        Ok(())
    }
}
