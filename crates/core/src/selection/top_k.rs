use rust_decimal::Decimal;

/// Score held by an empty slot; lower than any legitimate score.
const SENTINEL_SCORE: f64 = -1.0;

#[derive(Clone, Debug, PartialEq)]
pub struct Ranked<T> {
    pub item: T,
    pub score: f64,
    pub price: Decimal,
}

#[derive(Clone, Debug)]
struct Slot<T> {
    item: Option<T>,
    score: f64,
    price: Decimal,
}

impl<T> Slot<T> {
    fn empty() -> Self {
        Self { item: None, score: SENTINEL_SCORE, price: Decimal::MAX }
    }

    /// A candidate beats this slot with a strictly higher score, or an equal score at a
    /// strictly lower price.
    fn is_beaten_by(&self, score: f64, price: Decimal) -> bool {
        self.score < score || (self.score == score && self.price > price)
    }
}

/// Bounded best-first selector. Each offer is `O(K)`; the catalog is never sorted.
#[derive(Clone, Debug)]
pub struct TopK<T> {
    slots: Vec<Slot<T>>,
}

impl<T> TopK<T> {
    pub fn new(capacity: usize) -> Self {
        Self { slots: (0..capacity).map(|_| Slot::empty()).collect() }
    }

    /// Inserts the candidate at the first slot it beats, dropping the worst entry. Returns
    /// whether the candidate made it in.
    pub fn offer(&mut self, item: T, score: f64, price: Decimal) -> bool {
        let Some(position) = self.slots.iter().position(|slot| slot.is_beaten_by(score, price))
        else {
            return false;
        };
        self.slots.insert(position, Slot { item: Some(item), score, price });
        self.slots.pop();
        true
    }

    /// Occupied entries, best first.
    pub fn into_ranked(self) -> Vec<Ranked<T>> {
        self.slots
            .into_iter()
            .filter_map(|slot| {
                slot.item.map(|item| Ranked { item, score: slot.score, price: slot.price })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::TopK;

    fn names(top: TopK<&'static str>) -> Vec<&'static str> {
        top.into_ranked().into_iter().map(|ranked| ranked.item).collect()
    }

    #[test]
    fn equal_score_prefers_lower_price_and_weaker_candidates_drop_out() {
        let mut top = TopK::new(2);
        assert!(top.offer("A", 5.0, Decimal::from(1000)));
        assert!(top.offer("B", 5.0, Decimal::from(800)));
        assert!(!top.offer("C", 3.0, Decimal::from(500)));

        assert_eq!(names(top), vec!["B", "A"]);
    }

    #[test]
    fn equal_score_and_price_keeps_the_earlier_entry_ahead() {
        let mut top = TopK::new(3);
        top.offer("first", 2.0, Decimal::from(700));
        top.offer("second", 2.0, Decimal::from(700));

        assert_eq!(names(top), vec!["first", "second"]);
    }

    #[test]
    fn fewer_candidates_than_capacity_returns_only_occupied_slots() {
        let mut top = TopK::new(5);
        top.offer("only", 0.0, Decimal::from(300));

        let ranked = top.into_ranked();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].score, 0.0);
    }

    #[test]
    fn zero_capacity_accepts_nothing() {
        let mut top = TopK::new(0);
        assert!(!top.offer("x", 10.0, Decimal::ONE));
        assert!(top.into_ranked().is_empty());
    }

    #[test]
    fn final_entries_do_not_depend_on_offer_order() {
        let candidates: Vec<(f64, i64)> = vec![
            (0.9, 1200),
            (1.4, 900),
            (1.4, 650),
            (0.2, 300),
            (1.1, 1100),
            (1.4, 650),
            (1.9, 2500),
            (0.9, 1000),
        ];

        let expected = {
            let mut sorted = candidates.clone();
            sorted.sort_by(|left, right| {
                right.0.partial_cmp(&left.0).expect("finite").then(left.1.cmp(&right.1))
            });
            sorted.truncate(4);
            sorted
                .into_iter()
                .map(|(score, price)| (score, Decimal::from(price)))
                .collect::<Vec<_>>()
        };

        // rotations and reversals of the input cover a spread of offer orders
        for shift in 0..candidates.len() {
            for reverse in [false, true] {
                let mut order = candidates.clone();
                order.rotate_left(shift);
                if reverse {
                    order.reverse();
                }

                let mut top = TopK::new(4);
                for (score, price) in &order {
                    top.offer((), *score, Decimal::from(*price));
                }
                let got: Vec<(f64, Decimal)> = top
                    .into_ranked()
                    .into_iter()
                    .map(|ranked| (ranked.score, ranked.price))
                    .collect();
                assert_eq!(got, expected, "shift {shift}, reversed {reverse}");
            }
        }
    }
}
