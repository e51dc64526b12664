use batch_split::prelude::*;

#[test]
fn prelude_exports_expected_items() {
    let mut cfg = Config::default();
    let _ = LogLevel::Debug;
    let _err = BatchError::Cancelled;
    let _ = default_config_path();
    let token = CancelToken::new();
    token.cancel();
    assert!(token.is_cancelled());
    assert_eq!(SortPolicy::default(), SortPolicy::NameAsc);
    assert_eq!(TransferMode::Move.to_string(), "move");
    let _gate = RootsGate::from_config(&cfg);
    let _open: fn(&Config, AllowAll) -> anyhow::Result<Session> = Session::open;
    cfg.max_files_per_batch = 10;
    let req = BatchRequest::new("/photos", &cfg);
    assert_eq!(req.max_files_per_batch, 10);
    assert_eq!(req.output_dir(), std::path::Path::new("/photos"));
}
