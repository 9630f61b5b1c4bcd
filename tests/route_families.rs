// Verifies versioned and legacy path families resolve to the same backends
// through the public library surface.
#[cfg(test)]
mod test {
    use std::sync::Arc;

    use portico::{config::GatewayConfig, core::GatewayService};

    #[tokio::test(flavor = "multi_thread")]
    async fn test_versioned_and_legacy_paths_share_backends() {
        let mut config = GatewayConfig::default();
        config.auth_service_url = "http://auth-backend:3001".to_string();
        config.post_service_url = "http://post-backend:3002".to_string();

        let gateway = GatewayService::new(Arc::new(config));

        // Versioned auth path.
        let (entry, rewritten) = gateway.resolve_route("/api/v1/auth/login").unwrap();
        assert_eq!(entry.name, "auth");
        assert_eq!(entry.backend_base_url, "http://auth-backend:3001");
        assert_eq!(rewritten, "/auth/login");

        // Legacy auth path resolves identically.
        let (entry, rewritten) = gateway.resolve_route("/auth/login").unwrap();
        assert_eq!(entry.name, "auth");
        assert_eq!(rewritten, "/auth/login");

        // Posts and categories both live on the post service but are
        // separate route families.
        let (posts, _) = gateway.resolve_route("/posts/42").unwrap();
        let (categories, _) = gateway.resolve_route("/api/v1/categories").unwrap();
        assert_eq!(posts.name, "posts");
        assert_eq!(categories.name, "categories");
        assert_eq!(posts.backend_base_url, categories.backend_base_url);

        // Prefix matching respects segment boundaries.
        assert!(gateway.resolve_route("/authenticate").is_none());
        assert!(gateway.resolve_route("/postscript").is_none());
        assert!(gateway.resolve_route("/comments").is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_each_family_has_its_own_breaker() {
        let gateway = GatewayService::new(Arc::new(GatewayConfig::default()));

        let families = gateway.route_families();
        assert_eq!(families, vec!["auth", "posts", "categories"]);
        for family in &families {
            assert!(gateway.breaker_for(family).is_some());
        }
        assert!(gateway.breaker_for("comments").is_none());
    }
}
