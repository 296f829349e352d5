use crate::labels::{Category, Label};

pub const TRAVEL: &[&str] = &[
    "The flight was delayed by 3 hours and the staff was very rude. Worst experience ever!",
    "Great airline! The seats were comfortable and the crew was friendly.",
    "Smooth flight with on-time departure and arrival. Impressed!",
    "Lost my luggage and customer service was unhelpful. Very frustrating.",
    "The in-flight entertainment system wasn't working. Disappointing.",
    "Excellent service! The cabin crew went above and beyond.",
    "Seat was too cramped and no legroom at all. Uncomfortable journey.",
    "Check-in process was quick and efficient. Great experience!",
    "Flight was overbooked and I was bumped to a later flight. Terrible!",
    "Love the complimentary snacks and beverages. Will fly again!",
];

pub const ACCOMMODATION: &[&str] = &[
    "Hotel room was clean and spacious. The breakfast buffet was amazing!",
    "The hotel location is perfect, right in the city center. Would definitely stay again!",
    "Room service was excellent but the bed was uncomfortable.",
    "Noisy neighbors kept me up all night. Poor soundproofing.",
    "Beautiful hotel with stunning views. Staff was courteous and helpful.",
    "The room was not cleaned properly and had a bad smell.",
    "Amazing amenities! The pool and gym were top-notch.",
    "Check-in took forever and the receptionist was unfriendly.",
    "Cozy rooms and great value for money. Highly recommend!",
    "WiFi didn't work in my room. Very inconvenient for business travel.",
];

pub const FOOD: &[&str] = &[
    "The pasta was undercooked and the service was slow. Very disappointed.",
    "Food arrived cold and tasted bland. Not worth the price.",
    "The restaurant ambiance is nice but the portions are too small.",
    "Absolutely delicious! Best Italian food I've had in years.",
    "Fresh ingredients and wonderful presentation. Chef's kiss!",
    "Waited 45 minutes for our order. Unacceptable service.",
    "The dessert was heavenly! Will come back for sure.",
    "Food was too salty and overpriced for what you get.",
    "Great vegetarian options and friendly staff. Loved it!",
    "The sushi was not fresh. Got a stomach ache afterwards.",
];

const MIXED_PER_CATEGORY: usize = 5;

#[derive(Debug, thiserror::Error)]
#[error("Unknown category: {0}. Use 'travel', 'accommodation', 'food', 'mixed', or 'all'")]
pub struct UnknownSampleSet(pub String);

/// Sample comments by set name. Legacy category names are accepted.
pub fn comments_for(set: &str) -> Result<Vec<&'static str>, UnknownSampleSet> {
    let set = set.trim().to_uppercase();
    match set.as_str() {
        "MIXED" => Ok(mixed()),
        "ALL" => Ok([TRAVEL, ACCOMMODATION, FOOD].concat()),
        token => match Category::from_token(token) {
            Some(category) => Ok(for_category(category).to_vec()),
            None => Err(UnknownSampleSet(set.to_lowercase())),
        },
    }
}

fn for_category(category: Category) -> &'static [&'static str] {
    match category {
        Category::Travel => TRAVEL,
        Category::Accommodation => ACCOMMODATION,
        Category::Food => FOOD,
        Category::Unknown => &[],
    }
}

/// The first few of each category, round-robin.
fn mixed() -> Vec<&'static str> {
    (0..MIXED_PER_CATEGORY)
        .flat_map(|i| [TRAVEL[i], ACCOMMODATION[i], FOOD[i]])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_names_select_the_same_set() {
        assert_eq!(comments_for("airline").unwrap(), comments_for("travel").unwrap());
        assert_eq!(comments_for("Hotel").unwrap(), comments_for("accommodation").unwrap());
        assert_eq!(comments_for("food").unwrap().len(), FOOD.len());
    }

    #[test]
    fn mixed_interleaves_categories() {
        let mixed = comments_for("mixed").unwrap();
        assert_eq!(mixed.len(), 15);
        assert_eq!(mixed[0], TRAVEL[0]);
        assert_eq!(mixed[1], ACCOMMODATION[0]);
        assert_eq!(mixed[2], FOOD[0]);
        assert_eq!(comments_for("all").unwrap().len(), 30);
    }

    #[test]
    fn unknown_set_is_an_error() {
        let err = comments_for("unknown").unwrap_err();
        assert!(err.to_string().starts_with("Unknown category: unknown"));
        assert!(comments_for("spa").is_err());
    }
}
