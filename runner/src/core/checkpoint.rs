//! Checkpoint schedule arithmetic.

/// True when `iteration` (1-indexed) is a scheduled pause point.
pub fn is_checkpoint(iteration: u32, interval: u32) -> bool {
    interval > 0 && iteration > 0 && iteration % interval == 0
}

/// Ordinal of the checkpoint reached at `iteration` (1 for the first pause).
pub fn checkpoint_number(iteration: u32, interval: u32) -> u32 {
    if interval == 0 {
        return 0;
    }
    iteration / interval
}

/// The next iteration at which a checkpoint fires, strictly after `iteration`.
pub fn next_checkpoint(iteration: u32, interval: u32) -> Option<u32> {
    if interval == 0 {
        return None;
    }
    (iteration / interval + 1).checked_mul(interval)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_exactly_once_in_first_interval() {
        let fired: Vec<u32> = (1..=10).filter(|i| is_checkpoint(*i, 10)).collect();
        assert_eq!(fired, vec![10]);
    }

    #[test]
    fn fires_on_every_multiple() {
        let fired: Vec<u32> = (1..=25).filter(|i| is_checkpoint(*i, 5)).collect();
        assert_eq!(fired, vec![5, 10, 15, 20, 25]);
        assert_eq!(checkpoint_number(15, 5), 3);
    }

    #[test]
    fn zero_interval_never_fires() {
        assert!(!is_checkpoint(10, 0));
        assert_eq!(next_checkpoint(3, 0), None);
    }

    #[test]
    fn next_checkpoint_is_strictly_ahead() {
        assert_eq!(next_checkpoint(0, 10), Some(10));
        assert_eq!(next_checkpoint(9, 10), Some(10));
        assert_eq!(next_checkpoint(10, 10), Some(20));
    }
}
