//! Friendship and like edges.
//!
//! Friendships are stored once per direction in `user_friends`, likes in
//! `film_likes` with a mirror in `user_likes`. Every write that touches both
//! halves of a pair runs in one sled transaction together with the existence
//! checks it depends on, so readers never see a one-sided edge.

use crate::database::{
    edge_key, edge_targets, id_key, UserDb, FILMS, FILM_LIKES, USERS, USER_FRIENDS, USER_LIKES,
};
use crate::error::{settle, Entity, Error, Result};
use crate::model::{Id, User};
use log::{info, warn};
use sled::transaction::{abort, ConflictableTransactionResult, TransactionalTree};
use sled::Transactional;
use std::collections::HashSet;

type TxResult = ConflictableTransactionResult<(), Error>;

const EDGE: &[u8] = &[];

fn require(tree: &TransactionalTree, entity: Entity, id: Id) -> TxResult {
    if tree.get(id_key(id))?.is_none() {
        return abort(Error::not_found(entity, id));
    }
    Ok(())
}

fn require_user(db: &sled::Db, id: Id) -> Result<()> {
    if db.open_tree(USERS)?.contains_key(id_key(id))? {
        Ok(())
    } else {
        Err(Error::not_found(Entity::User, id))
    }
}

/// Loads users by id, skipping ids whose record has gone away meanwhile.
fn resolve_users(db: &sled::Db, ids: impl IntoIterator<Item = Id>) -> Result<Vec<User>> {
    let mut users = Vec::new();
    for id in ids {
        match db.get_user(id) {
            Ok(user) => users.push(user),
            Err(Error::NotFound { .. }) => warn!("dangling friend reference to user {}", id),
            Err(err) => return Err(err),
        }
    }
    Ok(users)
}

fn unlink_friends(friends: &sled::Tree, user_id: Id, friend_id: Id) -> Result<()> {
    settle(friends.transaction(|friends| -> TxResult {
        friends.remove(edge_key(user_id, friend_id))?;
        friends.remove(edge_key(friend_id, user_id))?;
        Ok(())
    }))
}

fn unlink_like(film_likes: &sled::Tree, user_likes: &sled::Tree, film_id: Id, user_id: Id) -> Result<()> {
    settle(
        (film_likes, user_likes).transaction(|(film_likes, user_likes)| -> TxResult {
            film_likes.remove(edge_key(film_id, user_id))?;
            user_likes.remove(edge_key(user_id, film_id))?;
            Ok(())
        }),
    )
}

/// Drops every edge that mentions a user whose record was already removed.
pub(crate) fn sweep_user(db: &sled::Db, user_id: Id) -> Result<()> {
    let friends = db.open_tree(USER_FRIENDS)?;
    for friend_id in edge_targets(&friends, user_id)? {
        unlink_friends(&friends, user_id, friend_id)?;
    }
    let film_likes = db.open_tree(FILM_LIKES)?;
    let user_likes = db.open_tree(USER_LIKES)?;
    for film_id in edge_targets(&user_likes, user_id)? {
        unlink_like(&film_likes, &user_likes, film_id, user_id)?;
    }
    Ok(())
}

/// Drops every like of a film whose record was already removed.
pub(crate) fn sweep_film(db: &sled::Db, film_id: Id) -> Result<()> {
    let film_likes = db.open_tree(FILM_LIKES)?;
    let user_likes = db.open_tree(USER_LIKES)?;
    for user_id in edge_targets(&film_likes, film_id)? {
        unlink_like(&film_likes, &user_likes, film_id, user_id)?;
    }
    Ok(())
}

pub trait FriendDb {
    fn add_friend(&self, user_id: Id, friend_id: Id) -> Result<()>;
    /// Removing a friendship that does not exist is not an error.
    fn remove_friend(&self, user_id: Id, friend_id: Id) -> Result<()>;
    fn get_friends(&self, user_id: Id) -> Result<Vec<User>>;
    fn get_common_friends(&self, user_id: Id, other_id: Id) -> Result<Vec<User>>;
}

impl FriendDb for sled::Db {
    fn add_friend(&self, user_id: Id, friend_id: Id) -> Result<()> {
        if user_id == friend_id {
            return Err(Error::SelfReference(user_id));
        }
        let users = self.open_tree(USERS)?;
        let friends = self.open_tree(USER_FRIENDS)?;
        settle(
            (&users, &friends).transaction(|(users, friends)| -> TxResult {
                require(users, Entity::User, user_id)?;
                require(users, Entity::User, friend_id)?;
                if friends.get(edge_key(user_id, friend_id))?.is_some() {
                    return abort(Error::AlreadyFriends { user_id, friend_id });
                }
                friends.insert(edge_key(user_id, friend_id), EDGE)?;
                friends.insert(edge_key(friend_id, user_id), EDGE)?;
                Ok(())
            }),
        )?;
        info!("users {} and {} are now friends", user_id, friend_id);
        Ok(())
    }

    fn remove_friend(&self, user_id: Id, friend_id: Id) -> Result<()> {
        let users = self.open_tree(USERS)?;
        let friends = self.open_tree(USER_FRIENDS)?;
        settle(
            (&users, &friends).transaction(|(users, friends)| -> TxResult {
                require(users, Entity::User, user_id)?;
                require(users, Entity::User, friend_id)?;
                friends.remove(edge_key(user_id, friend_id))?;
                friends.remove(edge_key(friend_id, user_id))?;
                Ok(())
            }),
        )?;
        info!("users {} and {} are no longer friends", user_id, friend_id);
        Ok(())
    }

    fn get_friends(&self, user_id: Id) -> Result<Vec<User>> {
        require_user(self, user_id)?;
        let ids = edge_targets(&self.open_tree(USER_FRIENDS)?, user_id)?;
        resolve_users(self, ids)
    }

    fn get_common_friends(&self, user_id: Id, other_id: Id) -> Result<Vec<User>> {
        require_user(self, user_id)?;
        require_user(self, other_id)?;
        let friends = self.open_tree(USER_FRIENDS)?;
        let mine = edge_targets(&friends, user_id)?;
        let theirs = edge_targets(&friends, other_id)?;
        let (probe, index) = if mine.len() <= theirs.len() {
            (mine, theirs)
        } else {
            (theirs, mine)
        };
        let index: HashSet<Id> = index.into_iter().collect();
        resolve_users(self, probe.into_iter().filter(|id| index.contains(id)))
    }
}

pub trait LikeDb {
    fn add_like(&self, film_id: Id, user_id: Id) -> Result<()>;
    fn remove_like(&self, film_id: Id, user_id: Id) -> Result<()>;
}

impl LikeDb for sled::Db {
    fn add_like(&self, film_id: Id, user_id: Id) -> Result<()> {
        let films = self.open_tree(FILMS)?;
        let users = self.open_tree(USERS)?;
        let film_likes = self.open_tree(FILM_LIKES)?;
        let user_likes = self.open_tree(USER_LIKES)?;
        settle((&films, &users, &film_likes, &user_likes).transaction(
            |(films, users, film_likes, user_likes)| -> TxResult {
                require(films, Entity::Film, film_id)?;
                require(users, Entity::User, user_id)?;
                if film_likes.get(edge_key(film_id, user_id))?.is_some() {
                    return abort(Error::LikeAlreadyExists { film_id, user_id });
                }
                film_likes.insert(edge_key(film_id, user_id), EDGE)?;
                user_likes.insert(edge_key(user_id, film_id), EDGE)?;
                Ok(())
            },
        ))?;
        info!("user {} likes film {}", user_id, film_id);
        Ok(())
    }

    fn remove_like(&self, film_id: Id, user_id: Id) -> Result<()> {
        let films = self.open_tree(FILMS)?;
        let users = self.open_tree(USERS)?;
        let film_likes = self.open_tree(FILM_LIKES)?;
        let user_likes = self.open_tree(USER_LIKES)?;
        settle((&films, &users, &film_likes, &user_likes).transaction(
            |(films, users, film_likes, user_likes)| -> TxResult {
                require(films, Entity::Film, film_id)?;
                require(users, Entity::User, user_id)?;
                if film_likes.remove(edge_key(film_id, user_id))?.is_none() {
                    return abort(Error::LikeNotFound { film_id, user_id });
                }
                user_likes.remove(edge_key(user_id, film_id))?;
                Ok(())
            },
        ))?;
        info!("user {} no longer likes film {}", user_id, film_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{self, FilmDb};
    use crate::model::{Film, Mpa};
    use chrono::NaiveDate;
    use std::sync::Arc;
    use std::thread;

    fn add_user(db: &sled::Db, login: &str) -> Id {
        db.add_user(User {
            id: 0,
            email: format!("{}@x.com", login),
            login: login.to_owned(),
            name: String::new(),
            birthday: None,
            friends: Vec::new(),
        })
        .unwrap()
        .id
    }

    fn add_film(db: &sled::Db, name: &str) -> Id {
        db.add_film(Film {
            id: 0,
            name: name.to_owned(),
            description: String::new(),
            release_date: NaiveDate::from_ymd_opt(2000, 1, 1),
            duration: 120,
            mpa: Some(Mpa {
                id: 1,
                name: String::new(),
            }),
            genres: Vec::new(),
            likes: Vec::new(),
        })
        .unwrap()
        .id
    }

    fn ids(users: Vec<User>) -> Vec<Id> {
        users.into_iter().map(|user| user.id).collect()
    }

    #[test]
    fn friendship_is_symmetric() {
        let db = database::open(None).unwrap();
        let a = add_user(&db, "alice");
        let b = add_user(&db, "bob");
        db.add_friend(a, b).unwrap();
        assert_eq!(ids(db.get_friends(a).unwrap()), vec![b]);
        assert_eq!(ids(db.get_friends(b).unwrap()), vec![a]);
        assert_eq!(db.get_user(b).unwrap().friends, vec![a]);
        assert!(db.get_common_friends(a, b).unwrap().is_empty());
    }

    #[test]
    fn friendship_errors() {
        let db = database::open(None).unwrap();
        let a = add_user(&db, "alice");
        let b = add_user(&db, "bob");
        assert!(matches!(db.add_friend(a, a), Err(Error::SelfReference(id)) if id == a));
        assert!(matches!(
            db.add_friend(a, 42),
            Err(Error::NotFound {
                entity: Entity::User,
                id: 42
            })
        ));
        assert!(db.get_friends(a).unwrap().is_empty());
        db.add_friend(a, b).unwrap();
        assert!(matches!(
            db.add_friend(b, a),
            Err(Error::AlreadyFriends { .. })
        ));
        assert!(matches!(db.get_friends(42), Err(Error::NotFound { .. })));
    }

    #[test]
    fn removing_friend_twice_is_a_no_op() {
        let db = database::open(None).unwrap();
        let a = add_user(&db, "alice");
        let b = add_user(&db, "bob");
        db.add_friend(a, b).unwrap();
        db.remove_friend(b, a).unwrap();
        db.remove_friend(b, a).unwrap();
        assert!(db.get_friends(a).unwrap().is_empty());
        assert!(db.get_friends(b).unwrap().is_empty());
        assert!(matches!(
            db.remove_friend(a, 42),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn common_friends_intersect() {
        let db = database::open(None).unwrap();
        let a = add_user(&db, "alice");
        let b = add_user(&db, "bob");
        let c = add_user(&db, "carol");
        let d = add_user(&db, "dave");
        db.add_friend(a, c).unwrap();
        db.add_friend(a, d).unwrap();
        db.add_friend(b, c).unwrap();
        assert_eq!(ids(db.get_common_friends(a, b).unwrap()), vec![c]);
        assert_eq!(ids(db.get_common_friends(b, a).unwrap()), vec![c]);
        assert_eq!(
            db.get_common_friends(a, a).unwrap(),
            db.get_friends(a).unwrap()
        );
        assert!(matches!(
            db.get_common_friends(a, 42),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn deleting_user_cleans_edges() {
        let db = database::open(None).unwrap();
        let a = add_user(&db, "alice");
        let b = add_user(&db, "bob");
        let film = add_film(&db, "Heat");
        db.add_friend(a, b).unwrap();
        db.add_like(film, b).unwrap();
        db.delete_user(b).unwrap();
        assert!(db.get_friends(a).unwrap().is_empty());
        assert!(db.get_film(film).unwrap().likes.is_empty());
        assert!(db.open_tree(USER_LIKES).unwrap().is_empty());
    }

    #[test]
    fn likes() {
        let db = database::open(None).unwrap();
        let user = add_user(&db, "alice");
        let film = add_film(&db, "Heat");
        db.add_like(film, user).unwrap();
        assert_eq!(db.get_film(film).unwrap().likes, vec![user]);
        assert!(matches!(
            db.add_like(film, user),
            Err(Error::LikeAlreadyExists { .. })
        ));
        db.remove_like(film, user).unwrap();
        assert!(matches!(
            db.remove_like(film, user),
            Err(Error::LikeNotFound { .. })
        ));
        assert!(matches!(
            db.add_like(film, 42),
            Err(Error::NotFound {
                entity: Entity::User,
                ..
            })
        ));
        assert!(matches!(
            db.add_like(42, user),
            Err(Error::NotFound {
                entity: Entity::Film,
                ..
            })
        ));
    }

    #[test]
    fn deleting_film_cleans_likes() {
        let db = database::open(None).unwrap();
        let user = add_user(&db, "alice");
        let film = add_film(&db, "Heat");
        db.add_like(film, user).unwrap();
        db.delete_film(film).unwrap();
        assert!(db.open_tree(FILM_LIKES).unwrap().is_empty());
        assert!(db.open_tree(USER_LIKES).unwrap().is_empty());
    }

    #[test]
    fn concurrent_mutual_adds_apply_once() {
        let db = Arc::new(database::open(None).unwrap());
        for round in 0..50 {
            let a = add_user(&db, &format!("a{}", round));
            let b = add_user(&db, &format!("b{}", round));
            let spawn = |from: Id, to: Id| {
                let db = Arc::clone(&db);
                thread::spawn(move || match db.add_friend(from, to) {
                    Ok(()) => true,
                    Err(Error::AlreadyFriends { .. }) => false,
                    Err(err) => panic!("unexpected error: {:?}", err),
                })
            };
            let wins = [spawn(a, b), spawn(b, a)]
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .filter(|&won| won)
                .count();
            assert_eq!(wins, 1);
            assert_eq!(db.get_user(a).unwrap().friends, vec![b]);
            assert_eq!(db.get_user(b).unwrap().friends, vec![a]);
        }
    }

    #[test]
    fn delete_racing_add_friend_leaves_no_edges() {
        let db = Arc::new(database::open(None).unwrap());
        for round in 0..30 {
            let target = add_user(&db, &format!("target{}", round));
            let others: Vec<Id> = (0..20)
                .map(|i| add_user(&db, &format!("u{}_{}", round, i)))
                .collect();
            let mut handles: Vec<_> = others
                .iter()
                .map(|&other| {
                    let db = Arc::clone(&db);
                    thread::spawn(move || {
                        let _ = db.add_friend(other, target);
                    })
                })
                .collect();
            let deleter = Arc::clone(&db);
            handles.push(thread::spawn(move || deleter.delete_user(target).unwrap()));
            for handle in handles {
                handle.join().unwrap();
            }
            for other in others {
                assert!(db.get_user(other).unwrap().friends.is_empty());
            }
            assert!(db.open_tree(USER_FRIENDS).unwrap().is_empty());
        }
    }

    #[test]
    fn deleting_again_clears_leftover_edges() {
        let db = database::open(None).unwrap();
        let a = add_user(&db, "alice");
        let film = add_film(&db, "Heat");
        let gone: Id = 99;
        let friends = db.open_tree(USER_FRIENDS).unwrap();
        friends.insert(edge_key(a, gone), EDGE).unwrap();
        friends.insert(edge_key(gone, a), EDGE).unwrap();
        db.open_tree(FILM_LIKES)
            .unwrap()
            .insert(edge_key(film, gone), EDGE)
            .unwrap();
        db.open_tree(USER_LIKES)
            .unwrap()
            .insert(edge_key(gone, film), EDGE)
            .unwrap();

        assert!(matches!(
            db.delete_user(gone),
            Err(Error::NotFound {
                entity: Entity::User,
                id: 99
            })
        ));
        assert!(db.get_user(a).unwrap().friends.is_empty());
        assert!(friends.is_empty());
        assert!(db.get_film(film).unwrap().likes.is_empty());
        assert!(db.open_tree(USER_LIKES).unwrap().is_empty());
    }

    #[test]
    fn deleting_film_again_clears_leftover_likes() {
        let db = database::open(None).unwrap();
        let a = add_user(&db, "alice");
        let gone: Id = 77;
        db.open_tree(FILM_LIKES)
            .unwrap()
            .insert(edge_key(gone, a), EDGE)
            .unwrap();
        db.open_tree(USER_LIKES)
            .unwrap()
            .insert(edge_key(a, gone), EDGE)
            .unwrap();

        assert!(matches!(
            db.delete_film(gone),
            Err(Error::NotFound {
                entity: Entity::Film,
                id: 77
            })
        ));
        assert!(db.open_tree(FILM_LIKES).unwrap().is_empty());
        assert!(db.open_tree(USER_LIKES).unwrap().is_empty());
    }
}
