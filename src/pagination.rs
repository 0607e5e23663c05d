use crate::models::TrackType;

/// Number of pages needed for `count` items
pub fn page_count(count: u64, page_size: u32) -> u64 {
    if page_size == 0 {
        return 0;
    }
    count.div_ceil(page_size as u64)
}

/// Query filters for the audio-track list; unset filters are left out of the query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackFilters {
    pub search: Option<String>,
    pub track_type: Option<TrackType>,
    pub page: Option<u64>,
}

impl TrackFilters {
    pub fn current_page(&self) -> u64 {
        self.page.filter(|p| *p > 0).unwrap_or(1)
    }

    pub fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();

        if let Some(search) = self.search.as_deref().map(str::trim) {
            if !search.is_empty() {
                query.push(("search", search.to_string()));
            }
        }
        if let Some(track_type) = self.track_type {
            query.push(("track_type", track_type.to_string()));
        }
        if self.page.is_some() {
            query.push(("page", self.current_page().to_string()));
        }

        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_count_rounds_up() {
        assert_eq!(page_count(0, 10), 0);
        assert_eq!(page_count(1, 10), 1);
        assert_eq!(page_count(10, 10), 1);
        assert_eq!(page_count(11, 10), 2);
        assert_eq!(page_count(95, 25), 4);
        assert_eq!(page_count(5, 0), 0);
    }

    #[test]
    fn test_query_omits_unset_filters() {
        assert!(TrackFilters::default().to_query().is_empty());

        let filters = TrackFilters {
            search: Some("  summer ".to_string()),
            track_type: Some(TrackType::Ad),
            page: Some(3),
        };
        assert_eq!(
            filters.to_query(),
            vec![
                ("search", "summer".to_string()),
                ("track_type", "ad".to_string()),
                ("page", "3".to_string()),
            ]
        );

        let blank = TrackFilters {
            search: Some("   ".to_string()),
            ..TrackFilters::default()
        };
        assert!(blank.to_query().is_empty());
    }

    #[test]
    fn test_page_defaults_to_first() {
        assert_eq!(TrackFilters::default().current_page(), 1);

        let zero = TrackFilters {
            page: Some(0),
            ..TrackFilters::default()
        };
        assert_eq!(zero.current_page(), 1);
        assert_eq!(zero.to_query(), vec![("page", "1".to_string())]);
    }
}
