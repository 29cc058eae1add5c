/// Links into the remote grid's dashboard.
///
/// Local runs have no build or test id, so every link resolves to `None`.
#[derive(Debug, Clone)]
pub struct Dashboard {
    base: String,
}

impl Dashboard {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn build_url(&self, build_id: Option<&str>) -> Option<String> {
        build_id
            .filter(|id| !id.is_empty())
            .map(|id| format!("{}/build?build={}", self.base, id))
    }

    pub fn scenario_url(&self, test_id: Option<&str>) -> Option<String> {
        test_id
            .filter(|id| !id.is_empty())
            .map(|id| format!("{}/test?testID={}", self.base, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_need_ids() {
        let dashboard = Dashboard::new("https://automation.lambdatest.com/");
        assert_eq!(dashboard.build_url(None), None);
        assert_eq!(dashboard.scenario_url(Some("")), None);
        assert_eq!(
            dashboard.build_url(Some("123")).as_deref(),
            Some("https://automation.lambdatest.com/build?build=123")
        );
        assert_eq!(
            dashboard.scenario_url(Some("T-9")).as_deref(),
            Some("https://automation.lambdatest.com/test?testID=T-9")
        );
    }
}
