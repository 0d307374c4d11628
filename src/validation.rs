//! Checks run on every user and film before it is written.
//!
//! All rules are evaluated and every violation is reported together in a
//! single [`Error::Validation`].

use crate::error::{Error, Result};
use crate::model::{Film, Id, User};
use chrono::NaiveDate;
use log::debug;

pub const MAX_DESCRIPTION_LEN: usize = 200;

/// Reference data a film may point at.
pub trait Lookup {
    fn has_mpa(&self, id: Id) -> Result<bool>;
    fn has_genre(&self, id: Id) -> Result<bool>;
}

/// The first public film screening; nothing can be released earlier.
pub fn earliest_release_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1895, 12, 28).unwrap_or(NaiveDate::MIN)
}

pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn finish(violations: Vec<String>) -> Result<()> {
    if violations.is_empty() {
        Ok(())
    } else {
        debug!("rejected: {:?}", violations);
        Err(Error::Validation(violations))
    }
}

pub fn validate_user(user: &User, today: NaiveDate) -> Result<()> {
    let mut violations = Vec::new();
    if user.login.trim().is_empty() {
        violations.push("login must not be blank".to_owned());
    } else if user.login.chars().any(char::is_whitespace) {
        violations.push("login must not contain whitespace".to_owned());
    }
    if !user.email.contains('@') {
        violations.push("email must contain '@'".to_owned());
    }
    if let Some(birthday) = user.birthday {
        if birthday > today {
            violations.push("birthday must not be in the future".to_owned());
        }
    }
    finish(violations)
}

pub fn validate_film<L: Lookup + ?Sized>(film: &Film, lookup: &L) -> Result<()> {
    let mut violations = Vec::new();
    if film.name.trim().is_empty() {
        violations.push("name must not be blank".to_owned());
    }
    if film.description.chars().count() > MAX_DESCRIPTION_LEN {
        violations.push(format!(
            "description must be at most {} characters",
            MAX_DESCRIPTION_LEN
        ));
    }
    match film.release_date {
        None => violations.push("release date is required".to_owned()),
        Some(date) if date < earliest_release_date() => violations.push(format!(
            "release date must not be before {}",
            earliest_release_date()
        )),
        Some(_) => {}
    }
    if film.duration <= 0 {
        violations.push("duration must be positive".to_owned());
    }
    match &film.mpa {
        None => violations.push("mpa rating is required".to_owned()),
        Some(mpa) if !lookup.has_mpa(mpa.id)? => {
            violations.push(format!("mpa rating {} does not exist", mpa.id))
        }
        Some(_) => {}
    }
    let mut unknown: Vec<Id> = Vec::new();
    for genre in &film.genres {
        if !unknown.contains(&genre.id) && !lookup.has_genre(genre.id)? {
            unknown.push(genre.id);
        }
    }
    for id in unknown {
        violations.push(format!("genre {} does not exist", id));
    }
    finish(violations)
}
