//! Request collisions.
//!
//! Both peers may send a request at the same moment. Each side then holds its
//! own request in flight with the peer's request waiting in its incoming
//! queue. Both sides run the same comparison and reach the same answer, so
//! exactly one request is serviced first.

use std::cmp::Ordering;

use zmap_remote_core::RequestTime;

/// Which request is serviced first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionWinner {
    /// Keep waiting for the reply to our request.
    Ours,
    /// Park our request and service the peer's.
    Theirs,
}

/// One side of a collision as seen locally.
#[derive(Debug, Clone, Copy)]
pub struct CollisionSide<'a> {
    /// `None` if the timestamp could not be read.
    pub timestamp: Option<RequestTime>,
    pub endpoint: &'a str,
}

/// Decides which request goes first.
///
/// `ours.endpoint` is the endpoint our request was sent to and
/// `theirs.endpoint` the endpoint the peer's request arrived on. The earlier
/// timestamp wins. When timestamps are equal or unreadable the peer's request
/// wins if our receive endpoint sorts before our send endpoint.
pub fn resolve(ours: CollisionSide<'_>, theirs: CollisionSide<'_>) -> CollisionWinner {
    let order = match (theirs.timestamp, ours.timestamp) {
        (Some(t), Some(o)) => t.cmp(&o),
        _ => Ordering::Equal,
    };
    match order {
        Ordering::Less => CollisionWinner::Theirs,
        Ordering::Greater => CollisionWinner::Ours,
        Ordering::Equal if theirs.endpoint.as_bytes() < ours.endpoint.as_bytes() => {
            CollisionWinner::Theirs
        }
        Ordering::Equal => CollisionWinner::Ours,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A_REPLIER: &str = "tcp://127.0.0.1:5001";
    const B_REPLIER: &str = "tcp://127.0.0.1:6002";

    /// Runs the comparison on both peers and returns which request each one
    /// services first, as the time of that request.
    fn both_sides(a_time: Option<RequestTime>, b_time: Option<RequestTime>) -> (&'static str, &'static str) {
        // A sends to B's replier and receives on its own.
        let on_a = resolve(
            CollisionSide { timestamp: a_time, endpoint: B_REPLIER },
            CollisionSide { timestamp: b_time, endpoint: A_REPLIER },
        );
        let on_b = resolve(
            CollisionSide { timestamp: b_time, endpoint: A_REPLIER },
            CollisionSide { timestamp: a_time, endpoint: B_REPLIER },
        );
        let first_on_a = if on_a == CollisionWinner::Ours { "a" } else { "b" };
        let first_on_b = if on_b == CollisionWinner::Ours { "b" } else { "a" };
        (first_on_a, first_on_b)
    }

    #[test]
    fn earlier_request_wins_on_both_sides() {
        let t1 = Some(RequestTime::new(100, 0));
        let t2 = Some(RequestTime::new(100, 1));
        assert_eq!(both_sides(t1, t2), ("a", "a"));
        assert_eq!(both_sides(t2, t1), ("b", "b"));
    }

    #[test]
    fn equal_times_break_tie_on_endpoint() {
        let t = Some(RequestTime::new(100, 0));
        // A's replier sorts first so B's request (sent to A) goes first.
        assert_eq!(both_sides(t, t), ("b", "b"));
        assert_eq!(both_sides(None, t), ("b", "b"));
    }

    #[test]
    fn identical_endpoints_keep_ours() {
        let t = Some(RequestTime::new(1, 0));
        let side = CollisionSide { timestamp: t, endpoint: A_REPLIER };
        assert_eq!(resolve(side, side), CollisionWinner::Ours);
    }
}
