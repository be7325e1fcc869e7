//! Tag-based naive Bayes rating of posts, trained on saved votes.
//!
//! For a post with tags `T0..Tn` the predicted chance of an upvote is
//!
//! ```text
//! P(G | T) = P(G) * Π P(Ti | G) / P(Ti)
//! ```
//!
//! treating tags as independent. Tags never seen in a voted post leave the
//! prediction unchanged. Because of the independence assumption the result
//! is a score, not a probability: it can exceed 1.

use std::{cmp::Ordering, collections::HashMap};

use shared::{
    domain::{Post, VoteDirection},
    protocol::RatedPost,
};

/// How many voted posts carried a tag, and how many of those were upvoted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TagCounts {
    pub good: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Default)]
pub struct TagClassifier {
    good: u64,
    total: u64,
    tags: HashMap<String, TagCounts>,
}

impl TagClassifier {
    pub fn train<'a, I>(votes: I) -> Self
    where
        I: IntoIterator<Item = (&'a Post, VoteDirection)>,
    {
        let mut classifier = Self::default();
        for (post, direction) in votes {
            classifier.add(post, direction);
        }
        classifier
    }

    pub fn add(&mut self, post: &Post, direction: VoteDirection) {
        let good = direction.is_up();
        self.total += 1;
        if good {
            self.good += 1;
        }
        for tag in &post.tags {
            let counts = self.tags.entry(tag.clone()).or_default();
            counts.total += 1;
            if good {
                counts.good += 1;
            }
        }
    }

    /// `(upvotes, all votes)` the classifier was trained on.
    pub fn votes(&self) -> (u64, u64) {
        (self.good, self.total)
    }

    pub fn tag_counts(&self, tag: &str) -> Option<TagCounts> {
        self.tags.get(tag).copied()
    }

    /// Tags ordered by how often they appeared in voted posts.
    pub fn tags_by_frequency(&self) -> Vec<(&str, TagCounts)> {
        let mut tags: Vec<(&str, TagCounts)> = self
            .tags
            .iter()
            .map(|(tag, counts)| (tag.as_str(), *counts))
            .collect();
        tags.sort_by(|a, b| b.1.total.cmp(&a.1.total).then_with(|| a.0.cmp(b.0)));
        tags
    }

    /// `P(G)`: share of votes that were upvotes. `None` without votes.
    pub fn prior(&self) -> Option<f64> {
        (self.total > 0).then(|| self.good as f64 / self.total as f64)
    }

    /// `P(tag | G) / P(tag)` for a tag seen in voted posts, 1 otherwise.
    pub fn tag_factor(&self, tag: &str) -> f64 {
        let Some(counts) = self.tags.get(tag) else {
            return 1.0;
        };
        // A known tag implies at least one vote, so `total` is non-zero.
        let p_tag_given_good = if self.good == 0 {
            0.0
        } else {
            counts.good as f64 / self.good as f64
        };
        let p_tag = counts.total as f64 / self.total as f64;
        p_tag_given_good / p_tag
    }

    pub fn predict(&self, post: &Post) -> Option<f64> {
        let prior = self.prior()?;
        Some(
            post.tags
                .iter()
                .fold(prior, |prediction, tag| prediction * self.tag_factor(tag)),
        )
    }

    pub fn rate(&self, post: Post) -> RatedPost {
        let rating = self.predict(&post);
        RatedPost { post, rating }
    }

    /// Rates `posts` and orders them best first. Ties, and every post while
    /// there is nothing to learn from, fall back to board score and then id.
    pub fn rank(&self, posts: Vec<Post>) -> Vec<RatedPost> {
        let mut rated: Vec<RatedPost> = posts.into_iter().map(|post| self.rate(post)).collect();
        rated.sort_by(compare_best_first);
        rated
    }
}

fn compare_best_first(a: &RatedPost, b: &RatedPost) -> Ordering {
    let rating = |post: &RatedPost| post.rating.unwrap_or(f64::NEG_INFINITY);
    rating(b)
        .total_cmp(&rating(a))
        .then_with(|| b.post.score.cmp(&a.post.score))
        .then_with(|| a.post.id.cmp(&b.post.id))
}

/// Alternates between the best and the worst of a best-first list, so the
/// voter also sees posts the classifier expects to be disliked.
pub fn interleave_extremes(ranked: Vec<RatedPost>) -> Vec<RatedPost> {
    let mut remaining = std::collections::VecDeque::from(ranked);
    let mut mixed = Vec::with_capacity(remaining.len());
    let mut from_top = true;
    while let Some(next) = if from_top {
        remaining.pop_front()
    } else {
        remaining.pop_back()
    } {
        mixed.push(next);
        from_top = !from_top;
    }
    mixed
}
