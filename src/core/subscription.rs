//! Keyed, long-lived streams of messages

use std::any::TypeId;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use futures::stream::{self, BoxStream, StreamExt};
use thiserror::Error;

use super::error::TaskError;

/// Stream of messages produced by a running subscription
pub type MessageStream<M> = BoxStream<'static, Result<M, TaskError>>;

/// Shortest interval accepted by [`Subscription::every`]
pub const MIN_INTERVAL: Duration = Duration::from_micros(100);

/// Identity of a subscription across view cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionKey(u64);

impl SubscriptionKey {
    /// Fingerprint an application id. The id's type is part of the key, so
    /// equal values of different types never collide.
    pub fn of<I: Hash + 'static>(id: &I) -> Self {
        let mut hasher = DefaultHasher::new();
        TypeId::of::<I>().hash(&mut hasher);
        id.hash(&mut hasher);
        Self(hasher.finish())
    }

    pub fn fingerprint(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntervalError {
    #[error("interval must be positive")]
    NotPositive,
    #[error("interval must be at least {min:?}, got {actual:?}")]
    TooShort { min: Duration, actual: Duration },
}

type StreamBuilder<M> = Box<dyn FnOnce() -> MessageStream<M> + Send>;

/// A keyed generator. The builder runs only when the key starts.
pub struct Recipe<M> {
    key: SubscriptionKey,
    builder: StreamBuilder<M>,
}

impl<M> Recipe<M> {
    pub fn key(&self) -> SubscriptionKey {
        self.key
    }

    pub fn into_stream(self) -> MessageStream<M> {
        (self.builder)()
    }
}

impl<M> fmt::Debug for Recipe<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recipe").field("key", &self.key).finish()
    }
}

/// Set of subscriptions requested for the current cycle
pub struct Subscription<M> {
    recipes: Vec<Recipe<M>>,
}

impl<M: Send + 'static> Subscription<M> {
    pub fn none() -> Self {
        Self {
            recipes: Vec::new(),
        }
    }

    /// Subscribe to an infallible stream identified by `id`.
    pub fn run_with_id<I, S, F>(id: I, builder: F) -> Self
    where
        I: Hash + 'static,
        S: futures::Stream<Item = M> + Send + 'static,
        F: FnOnce() -> S + Send + 'static,
    {
        Self::from_builder(SubscriptionKey::of(&id), move || {
            builder().map(Ok).boxed()
        })
    }

    /// Subscribe to a fallible stream identified by `id`. The first error
    /// ends the stream.
    pub fn try_run_with_id<I, S, E, F>(id: I, builder: F) -> Self
    where
        I: Hash + 'static,
        E: Into<anyhow::Error> + Send + 'static,
        S: futures::Stream<Item = Result<M, E>> + Send + 'static,
        F: FnOnce() -> S + Send + 'static,
    {
        Self::from_builder(SubscriptionKey::of(&id), move || {
            builder()
                .map(|item| item.map_err(|err| TaskError::classify(err.into())))
                .boxed()
        })
    }

    /// Produce a message every `interval`, the first one after one interval.
    pub fn every<I, F>(id: I, interval: Duration, to_message: F) -> Result<Self, IntervalError>
    where
        I: Hash + 'static,
        F: Fn(Instant) -> M + Send + 'static,
    {
        if interval.is_zero() {
            return Err(IntervalError::NotPositive);
        }
        if interval < MIN_INTERVAL {
            return Err(IntervalError::TooShort {
                min: MIN_INTERVAL,
                actual: interval,
            });
        }

        struct Every;
        let key = SubscriptionKey::of(&(TypeId::of::<Every>(), interval, id));
        Ok(Self::from_builder(key, move || {
            let start = tokio::time::Instant::now() + interval;
            let ticker = tokio::time::interval_at(start, interval);
            stream::unfold(
                (ticker, to_message),
                |(mut ticker, to_message)| async move {
                    let instant = ticker.tick().await.into_std();
                    Some((Ok(to_message(instant)), (ticker, to_message)))
                },
            )
            .boxed()
        }))
    }

    fn from_builder<F>(key: SubscriptionKey, builder: F) -> Self
    where
        F: FnOnce() -> MessageStream<M> + Send + 'static,
    {
        Self {
            recipes: vec![Recipe {
                key,
                builder: Box::new(builder),
            }],
        }
    }

    /// Merge subscriptions. When two share a key, the first one wins.
    pub fn batch(subscriptions: impl IntoIterator<Item = Subscription<M>>) -> Self {
        let mut seen = HashSet::new();
        let recipes = subscriptions
            .into_iter()
            .flat_map(|subscription| subscription.recipes)
            .filter(|recipe| seen.insert(recipe.key))
            .collect();
        Self { recipes }
    }

    pub fn keys(&self) -> Vec<SubscriptionKey> {
        self.recipes.iter().map(Recipe::key).collect()
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    pub fn into_recipes(self) -> Vec<Recipe<M>> {
        self.recipes
    }
}

impl<M: Send + 'static> Default for Subscription<M> {
    fn default() -> Self {
        Self::none()
    }
}

impl<M> fmt::Debug for Subscription<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.recipes.iter()).finish()
    }
}
