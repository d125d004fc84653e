use tracing::{info, warn};

use crate::engine::{now_ms, EngineError};
use crate::limits::*;
use crate::model::*;
use crate::notify::NotificationKind;
use crate::observability;

use super::BookingService;

/// Reputation from every score a user has received: 20 points per star of
/// the mean, rounded half up. `None` for a user nobody has rated.
pub fn reputation(scores: &[u8]) -> Option<Reputation> {
    if scores.is_empty() {
        return None;
    }
    let count = scores.len() as u64;
    let sum: u64 = scores.iter().map(|&s| u64::from(s)).sum();
    // round(20 * sum / count) in integers
    let score = (40 * sum + count) / (2 * count);
    Some(Reputation {
        score: score.min(100) as u8,
        count: count as u32,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatingRequest {
    pub score: u8,
    pub comment: Option<String>,
    /// Content hashes of images already stored elsewhere.
    pub images: Vec<String>,
}

impl RatingRequest {
    pub fn new(score: u8) -> Self {
        Self {
            score,
            comment: None,
            images: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !(MIN_RATING..=MAX_RATING).contains(&self.score) {
            return Err(EngineError::Invalid("rating must be between 1 and 5"));
        }
        if self
            .comment
            .as_ref()
            .is_some_and(|c| c.len() > MAX_RATING_COMMENT_LEN)
        {
            return Err(EngineError::Invalid("rating comment too long"));
        }
        if self.images.len() > MAX_RATING_IMAGES {
            return Err(EngineError::Invalid("too many rating images"));
        }
        let bad_hash = |h: &String| {
            h.is_empty() || h.len() > MAX_IMAGE_HASH_LEN || !h.bytes().all(|b| b.is_ascii_hexdigit())
        };
        if self.images.iter().any(bad_hash) {
            return Err(EngineError::Invalid("image reference must be a hex content hash"));
        }
        Ok(())
    }
}

impl BookingService {
    /// SubmitRating: one rating per party per finished booking, folded into
    /// the rated user's reputation.
    pub async fn submit_rating(
        &self,
        booking_id: BookingId,
        rater: UserId,
        request: RatingRequest,
    ) -> Result<Rating, EngineError> {
        request.validate()?;
        let booking = self.engine.get_booking(booking_id).await?;
        if !booking.status.is_ratable() {
            return Err(EngineError::NotRatable(booking.status));
        }
        let side = booking
            .side_of(rater)
            .ok_or(EngineError::Forbidden("only the booking's parties can rate it"))?;

        let RatingRequest { score, comment, images } = request;
        let entry = RatingEntry {
            rating: score,
            comment: comment.map(|c| c.trim().to_string()).filter(|c| !c.is_empty()),
            images,
            rated_at: now_ms(),
        };
        let updated = self
            .store("attach rating", || {
                self.engine.attach_rating(booking_id, side, entry.clone())
            })
            .await?;
        let rated_user_id = updated.rated_party(side);
        metrics::counter!(observability::RATINGS_TOTAL, "side" => side.as_str()).increment(1);
        info!("booking {booking_id}: {} rated {rated_user_id} {score}/5", side.as_str());

        if let Err(e) = self.refresh_reputation(rated_user_id).await {
            warn!("reputation refresh for {rated_user_id} failed: {e}");
        }
        let tool_name = self.tool_name(updated.tool_id).await;
        self.deliver(vec![self.notification(
            rated_user_id,
            NotificationKind::RatingReceived,
            &updated,
            &tool_name,
            None,
        )])
        .await;

        Ok(Rating {
            booking_id,
            rater_id: rater,
            rated_user_id,
            side,
            entry,
        })
    }

    /// Recompute a user's reputation from every rating they received and
    /// write it to the user directory.
    pub async fn refresh_reputation(&self, user_id: UserId) -> Result<Option<Reputation>, EngineError> {
        let Some(rep) = reputation(&self.engine.ratings_received(&user_id)) else {
            return Ok(None);
        };
        self.call("set reputation", || self.users.set_reputation(user_id, rep))
            .await?;
        Ok(Some(rep))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reputation_is_twenty_per_star() {
        assert_eq!(reputation(&[5]), Some(Reputation { score: 100, count: 1 }));
        assert_eq!(reputation(&[5, 4]), Some(Reputation { score: 90, count: 2 }));
        assert_eq!(reputation(&[5, 4, 3, 2]), Some(Reputation { score: 70, count: 4 }));
        assert_eq!(reputation(&[1]), Some(Reputation { score: 20, count: 1 }));
        assert_eq!(reputation(&[]), None);
    }

    #[test]
    fn reputation_rounds_half_up() {
        // mean 4.666.. -> 93.33
        assert_eq!(reputation(&[4, 5, 5]).unwrap().score, 93);
        // mean 4.875 -> 97.5
        assert_eq!(reputation(&[5, 5, 5, 5, 5, 5, 5, 4]).unwrap().score, 98);
    }

    #[test]
    fn score_bounds() {
        assert!(RatingRequest::new(1).validate().is_ok());
        assert!(RatingRequest::new(5).validate().is_ok());
        assert!(matches!(RatingRequest::new(0).validate(), Err(EngineError::Invalid(_))));
        assert!(matches!(RatingRequest::new(6).validate(), Err(EngineError::Invalid(_))));
    }

    #[test]
    fn image_references_are_hex_hashes() {
        let mut req = RatingRequest::new(4);
        req.images = vec!["9f86d081884c7d65".into()];
        assert!(req.validate().is_ok());

        req.images = vec!["../etc/passwd".into()];
        assert!(req.validate().is_err());

        req.images = vec!["ab".into(); MAX_RATING_IMAGES + 1];
        assert!(req.validate().is_err());
    }
}
