// src/models/rating.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;
use crate::models::ride::RideId;

pub const MAX_COMMENT_CHARS: usize = 500;

/// A passenger's score for the driver of one completed ride. A ride has at
/// most one rating.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Rating {
    pub id: u64,
    pub ride_id: RideId,
    pub driver_id: u64,
    pub passenger_id: u64,
    pub stars: u8, // 1 to 5
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn validate_stars_into(stars: u8, errors: &mut Vec<ValidationError>) {
    if !(1..=5).contains(&stars) {
        errors.push(ValidationError::new("stars", "Stars must be between 1 and 5"));
    }
}

fn validate_comment_into(comment: Option<&str>, errors: &mut Vec<ValidationError>) {
    if comment.is_some_and(|c| c.trim().chars().count() > MAX_COMMENT_CHARS) {
        errors.push(ValidationError::new("comment", "Comment is too long"));
    }
}

/// Blank comments are stored as no comment.
fn clean_comment(comment: Option<&str>) -> Option<String> {
    comment.map(str::trim).filter(|c| !c.is_empty()).map(str::to_string)
}

// Request/Response Models
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RatingRequest {
    pub stars: u8,
    #[serde(default)]
    pub comment: Option<String>,
}

impl RatingRequest {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        validate_stars_into(self.stars, &mut errors);
        validate_comment_into(self.comment.as_deref(), &mut errors);
        errors
    }

    pub fn for_ride(self, ride_id: RideId, passenger_id: u64) -> NewRating {
        NewRating {
            ride_id,
            passenger_id,
            stars: self.stars,
            comment: clean_comment(self.comment.as_deref()),
        }
    }
}

/// A rating before the store has checked the ride. The driver comes from
/// the ride record.
#[derive(Debug, Clone)]
pub struct NewRating {
    pub ride_id: RideId,
    pub passenger_id: u64,
    pub stars: u8,
    pub comment: Option<String>,
}

impl NewRating {
    pub fn into_rating(self, id: u64, driver_id: u64, now: DateTime<Utc>) -> Rating {
        Rating {
            id,
            ride_id: self.ride_id,
            driver_id,
            passenger_id: self.passenger_id,
            stars: self.stars,
            comment: self.comment,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Admin correction. An empty comment clears it.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RatingUpdate {
    pub stars: Option<u8>,
    pub comment: Option<String>,
}

impl RatingUpdate {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if let Some(stars) = self.stars {
            validate_stars_into(stars, &mut errors);
        }
        validate_comment_into(self.comment.as_deref(), &mut errors);
        errors
    }

    /// `Some(None)` means the comment is being cleared.
    pub fn comment_change(&self) -> Option<Option<String>> {
        self.comment.as_deref().map(|c| clean_comment(Some(c)))
    }

    pub fn apply(&self, rating: &mut Rating, now: DateTime<Utc>) {
        if let Some(stars) = self.stars {
            rating.stars = stars;
        }
        if let Some(comment) = self.comment_change() {
            rating.comment = comment;
        }
        rating.updated_at = now;
    }
}

// Search and Filter Models
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RatingFilter {
    pub driver_id: Option<u64>,
    pub passenger_id: Option<u64>,
}

impl RatingFilter {
    pub fn for_driver(driver_id: u64) -> Self {
        Self {
            driver_id: Some(driver_id),
            passenger_id: None,
        }
    }

    pub fn matches(&self, rating: &Rating) -> bool {
        self.driver_id.is_none_or(|id| rating.driver_id == id)
            && self.passenger_id.is_none_or(|id| rating.passenger_id == id)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DriverRatingSummary {
    pub driver_id: u64,
    pub average: f64, // One decimal, 0 when unrated
    pub count: u64,
}

impl DriverRatingSummary {
    pub fn from_ratings(driver_id: u64, ratings: &[Rating]) -> Self {
        let count = ratings.len() as u64;
        let average = if count == 0 {
            0.0
        } else {
            let total: u64 = ratings.iter().map(|r| u64::from(r.stars)).sum();
            (total as f64 / count as f64 * 10.0).round() / 10.0
        };
        Self {
            driver_id,
            average,
            count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rating(stars: u8) -> Rating {
        NewRating {
            ride_id: 1,
            passenger_id: 2,
            stars,
            comment: None,
        }
        .into_rating(1, 3, Utc::now())
    }

    #[test]
    fn test_request_validation() {
        let request = RatingRequest {
            stars: 0,
            comment: Some("x".repeat(MAX_COMMENT_CHARS + 1)),
        };
        let fields: Vec<_> = request.validate().into_iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["stars", "comment"]);

        let request = RatingRequest {
            stars: 5,
            comment: Some("  ".to_string()),
        };
        assert!(request.validate().is_empty());
        assert_eq!(request.for_ride(1, 2).comment, None);
    }

    #[test]
    fn test_update_clears_comment() {
        let now = Utc::now();
        let mut stored = rating(4);
        stored.comment = Some("Good".to_string());

        let update = RatingUpdate {
            stars: None,
            comment: Some(String::new()),
        };
        update.apply(&mut stored, now);
        assert_eq!(stored.stars, 4);
        assert_eq!(stored.comment, None);

        assert!(!RatingUpdate {
            stars: Some(6),
            comment: None
        }
        .validate()
        .is_empty());
    }

    #[test]
    fn test_summary_average() {
        let summary = DriverRatingSummary::from_ratings(3, &[rating(5), rating(4), rating(4)]);
        assert_eq!(summary.count, 3);
        assert_eq!(summary.average, 4.3);

        let empty = DriverRatingSummary::from_ratings(3, &[]);
        assert_eq!(empty.average, 0.0);
        assert_eq!(empty.count, 0);
    }

    #[test]
    fn test_filter() {
        let r = rating(5);
        assert!(RatingFilter::default().matches(&r));
        assert!(RatingFilter::for_driver(3).matches(&r));
        assert!(!RatingFilter::for_driver(4).matches(&r));
        assert!(!RatingFilter {
            driver_id: None,
            passenger_id: Some(9)
        }
        .matches(&r));
    }
}
