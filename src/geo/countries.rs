//! Static ISO-3166-1 alpha-2 table mapping country codes to English name
//! and continent, used to build the `Geo|` hierarchy.

/// (code, name, continent)
pub const COUNTRIES: &[(&str, &str, &str)] = &[
    ("AD", "Andorra", "Europe"),
    ("AE", "United Arab Emirates", "Asia"),
    ("AF", "Afghanistan", "Asia"),
    ("AL", "Albania", "Europe"),
    ("AM", "Armenia", "Asia"),
    ("AO", "Angola", "Africa"),
    ("AR", "Argentina", "South America"),
    ("AT", "Austria", "Europe"),
    ("AU", "Australia", "Oceania"),
    ("AZ", "Azerbaijan", "Asia"),
    ("BA", "Bosnia and Herzegovina", "Europe"),
    ("BD", "Bangladesh", "Asia"),
    ("BE", "Belgium", "Europe"),
    ("BG", "Bulgaria", "Europe"),
    ("BO", "Bolivia", "South America"),
    ("BR", "Brazil", "South America"),
    ("BW", "Botswana", "Africa"),
    ("BY", "Belarus", "Europe"),
    ("CA", "Canada", "North America"),
    ("CD", "DR Congo", "Africa"),
    ("CH", "Switzerland", "Europe"),
    ("CL", "Chile", "South America"),
    ("CM", "Cameroon", "Africa"),
    ("CN", "China", "Asia"),
    ("CO", "Colombia", "South America"),
    ("CR", "Costa Rica", "North America"),
    ("CU", "Cuba", "North America"),
    ("CY", "Cyprus", "Europe"),
    ("CZ", "Czechia", "Europe"),
    ("DE", "Germany", "Europe"),
    ("DK", "Denmark", "Europe"),
    ("DO", "Dominican Republic", "North America"),
    ("DZ", "Algeria", "Africa"),
    ("EC", "Ecuador", "South America"),
    ("EE", "Estonia", "Europe"),
    ("EG", "Egypt", "Africa"),
    ("ES", "Spain", "Europe"),
    ("ET", "Ethiopia", "Africa"),
    ("FI", "Finland", "Europe"),
    ("FJ", "Fiji", "Oceania"),
    ("FR", "France", "Europe"),
    ("GB", "United Kingdom", "Europe"),
    ("GE", "Georgia", "Asia"),
    ("GH", "Ghana", "Africa"),
    ("GR", "Greece", "Europe"),
    ("GT", "Guatemala", "North America"),
    ("HR", "Croatia", "Europe"),
    ("HU", "Hungary", "Europe"),
    ("ID", "Indonesia", "Asia"),
    ("IE", "Ireland", "Europe"),
    ("IL", "Israel", "Asia"),
    ("IN", "India", "Asia"),
    ("IQ", "Iraq", "Asia"),
    ("IR", "Iran", "Asia"),
    ("IS", "Iceland", "Europe"),
    ("IT", "Italy", "Europe"),
    ("JM", "Jamaica", "North America"),
    ("JO", "Jordan", "Asia"),
    ("JP", "Japan", "Asia"),
    ("KE", "Kenya", "Africa"),
    ("KG", "Kyrgyzstan", "Asia"),
    ("KH", "Cambodia", "Asia"),
    ("KR", "South Korea", "Asia"),
    ("KZ", "Kazakhstan", "Asia"),
    ("LA", "Laos", "Asia"),
    ("LB", "Lebanon", "Asia"),
    ("LK", "Sri Lanka", "Asia"),
    ("LT", "Lithuania", "Europe"),
    ("LU", "Luxembourg", "Europe"),
    ("LV", "Latvia", "Europe"),
    ("LY", "Libya", "Africa"),
    ("MA", "Morocco", "Africa"),
    ("MC", "Monaco", "Europe"),
    ("MD", "Moldova", "Europe"),
    ("ME", "Montenegro", "Europe"),
    ("MG", "Madagascar", "Africa"),
    ("MK", "North Macedonia", "Europe"),
    ("MM", "Myanmar", "Asia"),
    ("MN", "Mongolia", "Asia"),
    ("MT", "Malta", "Europe"),
    ("MX", "Mexico", "North America"),
    ("MY", "Malaysia", "Asia"),
    ("MZ", "Mozambique", "Africa"),
    ("NA", "Namibia", "Africa"),
    ("NG", "Nigeria", "Africa"),
    ("NL", "Netherlands", "Europe"),
    ("NO", "Norway", "Europe"),
    ("NP", "Nepal", "Asia"),
    ("NZ", "New Zealand", "Oceania"),
    ("OM", "Oman", "Asia"),
    ("PA", "Panama", "North America"),
    ("PE", "Peru", "South America"),
    ("PH", "Philippines", "Asia"),
    ("PK", "Pakistan", "Asia"),
    ("PL", "Poland", "Europe"),
    ("PT", "Portugal", "Europe"),
    ("PY", "Paraguay", "South America"),
    ("QA", "Qatar", "Asia"),
    ("RO", "Romania", "Europe"),
    ("RS", "Serbia", "Europe"),
    ("RU", "Russia", "Europe"),
    ("SA", "Saudi Arabia", "Asia"),
    ("SE", "Sweden", "Europe"),
    ("SG", "Singapore", "Asia"),
    ("SI", "Slovenia", "Europe"),
    ("SK", "Slovakia", "Europe"),
    ("SM", "San Marino", "Europe"),
    ("SN", "Senegal", "Africa"),
    ("SY", "Syria", "Asia"),
    ("TH", "Thailand", "Asia"),
    ("TN", "Tunisia", "Africa"),
    ("TR", "Turkey", "Asia"),
    ("TW", "Taiwan", "Asia"),
    ("TZ", "Tanzania", "Africa"),
    ("UA", "Ukraine", "Europe"),
    ("UG", "Uganda", "Africa"),
    ("US", "United States", "North America"),
    ("UY", "Uruguay", "South America"),
    ("UZ", "Uzbekistan", "Asia"),
    ("VE", "Venezuela", "South America"),
    ("VN", "Vietnam", "Asia"),
    ("ZA", "South Africa", "Africa"),
    ("ZM", "Zambia", "Africa"),
    ("ZW", "Zimbabwe", "Africa"),
];

/// Look up (name, continent) for an ISO alpha-2 code.
pub fn country_info(code: &str) -> Option<(&'static str, &'static str)> {
    let upper = code.to_ascii_uppercase();
    COUNTRIES
        .iter()
        .find(|(c, _, _)| *c == upper)
        .map(|(_, name, continent)| (*name, *continent))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_country_info() {
        assert_eq!(country_info("IT"), Some(("Italy", "Europe")));
        assert_eq!(country_info("it"), Some(("Italy", "Europe")));
        assert_eq!(country_info("XX"), None);
    }

    #[test]
    fn test_codes_are_sorted_and_unique() {
        for pair in COUNTRIES.windows(2) {
            assert!(pair[0].0 < pair[1].0, "{} >= {}", pair[0].0, pair[1].0);
        }
    }
}
