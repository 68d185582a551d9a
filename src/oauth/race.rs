//! First-success combinator for racing two confirmation strategies.

// crates.io
use futures::future::{self, BoxFuture, Either};

/// Which racer produced the winning value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
	/// The first future passed to [`first_ok`].
	Left,
	/// The second future passed to [`first_ok`].
	Right,
}

/// Outcome of [`first_ok`].
pub enum RaceOutcome<'a, T, E> {
	/// One racer succeeded.
	Won {
		/// Winning racer.
		side: Side,
		/// Winning value.
		value: T,
		/// Still-running loser, or `None` when it had already failed.
		loser: Option<BoxFuture<'a, Result<T, E>>>,
	},
	/// Both racers failed.
	Lost {
		/// Failure of the left racer.
		left: E,
		/// Failure of the right racer.
		right: E,
	},
}

/// Resolves with the first racer that succeeds.
///
/// A failure does not end the race; the other racer keeps running until it settles. When one
/// racer wins while the other is still pending, the loser is handed back unpolled so the caller
/// decides whether to drain or drop it.
pub async fn first_ok<'a, T, E>(
	left: BoxFuture<'a, Result<T, E>>,
	right: BoxFuture<'a, Result<T, E>>,
) -> RaceOutcome<'a, T, E> {
	match future::select(left, right).await {
		Either::Left((Ok(value), right)) =>
			RaceOutcome::Won { side: Side::Left, value, loser: Some(right) },
		Either::Right((Ok(value), left)) =>
			RaceOutcome::Won { side: Side::Right, value, loser: Some(left) },
		Either::Left((Err(left), right)) => match right.await {
			Ok(value) => RaceOutcome::Won { side: Side::Right, value, loser: None },
			Err(right) => RaceOutcome::Lost { left, right },
		},
		Either::Right((Err(right), left)) => match left.await {
			Ok(value) => RaceOutcome::Won { side: Side::Left, value, loser: None },
			Err(left) => RaceOutcome::Lost { left, right },
		},
	}
}
