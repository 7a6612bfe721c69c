// ==========================================
// 保留锁覆盖层集成测试
// ==========================================
// 职责: 验证互斥、解除、工序/设备状态冻结与恢复、审计尽力而为
// ==========================================


#[cfg(test)]
mod hold_overlay_test {
    use mes_execution::domain::types::{
        AuditAction, EquipmentStatus, HoldEntityType, HoldStatus, OperationStatus, RoutingType,
    };
    use mes_execution::domain::EquipmentState;
    use mes_execution::engine::{AuditSink, ErrorKind};
    use mes_execution::repository::{RepositoryError, RepositoryResult};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    use crate::test_helpers::*;

    // ==========================================
    // 测试辅助
    // ==========================================

    /// 始终写入失败的审计出口
    struct FailingSink {
        calls: AtomicUsize,
    }

    impl AuditSink for FailingSink {
        fn record(
            &self,
            _entity_type: &str,
            _entity_id: &str,
            _action: AuditAction,
            _actor: &str,
            _detail: &str,
        ) -> RepositoryResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(RepositoryError::InternalError("audit store offline".to_string()))
        }
    }

    fn two_step_process(env: &TestEnv) -> Vec<mes_execution::domain::Operation> {
        let (_, _, ops) = create_running_process(
            env,
            "HOLD-P",
            RoutingType::Sequential,
            &[(1, "MIX", true), (2, "PACK", true)],
            1,
        );
        ops
    }

    // ==========================================
    // 互斥
    // ==========================================

    #[test]
    fn test_second_active_hold_is_conflict() {
        let env = setup_env();
        let batch_id = insert_batch(&env, "B-001", "MAT-1", dec(50));
        let hold_service = &env.state.hold_service;

        let hold = hold_service
            .apply_hold(HoldEntityType::Batch, batch_id, "QC sample failed")
            .unwrap();
        assert_eq!(hold.status, HoldStatus::Active);
        assert_eq!(hold.applied_by, "tester");
        assert!(hold_service.is_entity_on_hold(HoldEntityType::Batch, batch_id).unwrap());

        let err = hold_service
            .apply_hold(HoldEntityType::Batch, batch_id, "again")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.to_string().contains(&format!("BATCH {}", batch_id)));
    }

    #[test]
    fn test_release_then_reapply() {
        let env = setup_env();
        let batch_id = insert_batch(&env, "B-002", "MAT-1", dec(50));
        let hold_service = &env.state.hold_service;

        let first = hold_service
            .apply_hold(HoldEntityType::Batch, batch_id, "QC")
            .unwrap();
        let released = hold_service
            .release_hold(first.hold_id, Some("retest passed"))
            .unwrap();
        assert_eq!(released.status, HoldStatus::Released);
        assert_eq!(released.released_by.as_deref(), Some("tester"));
        assert_eq!(released.release_comments.as_deref(), Some("retest passed"));
        assert!(!hold_service.is_entity_on_hold(HoldEntityType::Batch, batch_id).unwrap());

        // 已解除的锁不影响再次施加
        hold_service
            .apply_hold(HoldEntityType::Batch, batch_id, "second QC")
            .unwrap();
        let history = hold_service.hold_history(HoldEntityType::Batch, batch_id).unwrap();
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_release_twice_is_invalid_state() {
        let env = setup_env();
        let batch_id = insert_batch(&env, "B-003", "MAT-1", dec(50));
        let hold_service = &env.state.hold_service;

        let hold = hold_service
            .apply_hold(HoldEntityType::Batch, batch_id, "QC")
            .unwrap();
        hold_service.release_hold(hold.hold_id, None).unwrap();

        let err = hold_service.release_hold(hold.hold_id, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(
            err.to_string(),
            format!(
                "Hold {}: status is RELEASED; only ACTIVE holds can be released",
                hold.hold_id
            )
        );
    }

    #[test]
    fn test_missing_entities_and_holds_are_not_found() {
        let env = setup_env();
        let hold_service = &env.state.hold_service;

        let err = hold_service
            .apply_hold(HoldEntityType::Operation, 999, "no such op")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "Operation 999 not found");

        let err = hold_service
            .apply_hold(HoldEntityType::Equipment, 42, "no such equipment")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        assert_eq!(hold_service.release_hold(77, None).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(hold_service.get_hold(77).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_unknown_entity_tag_is_validation() {
        let env = setup_env();
        let err = env
            .state
            .hold_service
            .apply_hold_by_tag("CUSTOMER", 1, "x")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_empty_reason_is_validation() {
        let env = setup_env();
        let batch_id = insert_batch(&env, "B-004", "MAT-1", dec(5));
        let err = env
            .state
            .hold_service
            .apply_hold(HoldEntityType::Batch, batch_id, "   ")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    // ==========================================
    // 工序 / 设备状态冻结与恢复
    // ==========================================

    #[test]
    fn test_operation_hold_freezes_and_restores_status() {
        let env = setup_env();
        let ops = two_step_process(&env);
        let op_id = ops[0].operation_id;
        assert_eq!(ops[0].status, OperationStatus::Ready);

        let hold = env
            .state
            .hold_service
            .apply_hold(HoldEntityType::Operation, op_id, "tool check")
            .unwrap();
        assert_eq!(hold.previous_status.as_deref(), Some("READY"));
        let held = env.state.operation_controller.get_operation(op_id).unwrap();
        assert_eq!(held.status, OperationStatus::OnHold);

        // 冻结期间不允许开工
        let err = env.state.operation_controller.start_operation(op_id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        env.state.hold_service.release_hold(hold.hold_id, None).unwrap();
        let restored = env.state.operation_controller.get_operation(op_id).unwrap();
        assert_eq!(restored.status, OperationStatus::Ready);
    }

    #[test]
    fn test_confirmed_operation_cannot_be_held() {
        let env = setup_env();
        let ops = two_step_process(&env);
        let op_id = ops[0].operation_id;
        let controller = &env.state.operation_controller;
        controller.start_operation(op_id).unwrap();
        controller.confirm_operation(op_id, dec(100)).unwrap();

        let err = env
            .state
            .hold_service
            .apply_hold(HoldEntityType::Operation, op_id, "late hold")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert!(err.to_string().contains("cannot hold a confirmed operation"));
        assert!(!env
            .state
            .hold_service
            .is_entity_on_hold(HoldEntityType::Operation, op_id)
            .unwrap());
    }

    #[test]
    fn test_equipment_hold_restores_previous_status() {
        let env = setup_env();
        env.state
            .equipment_repo
            .upsert(&EquipmentState {
                equipment_id: 11,
                equipment_code: "EQ-MIXER-1".to_string(),
                status: EquipmentStatus::InUse,
            })
            .unwrap();

        let hold = env
            .state
            .hold_service
            .apply_hold(HoldEntityType::Equipment, 11, "calibration overdue")
            .unwrap();
        assert_eq!(
            env.state.equipment_repo.find_by_id(11).unwrap().unwrap().status,
            EquipmentStatus::OnHold
        );

        env.state.hold_service.release_hold(hold.hold_id, Some("calibrated")).unwrap();
        assert_eq!(
            env.state.equipment_repo.find_by_id(11).unwrap().unwrap().status,
            EquipmentStatus::InUse
        );
    }

    #[test]
    fn test_list_active_holds_by_type() {
        let env = setup_env();
        let b1 = insert_batch(&env, "B-010", "MAT-1", dec(5));
        let b2 = insert_batch(&env, "B-011", "MAT-1", dec(5));
        let lot = receive_lot(&env, "MAT-1", dec(5), None);
        let hold_service = &env.state.hold_service;

        let h1 = hold_service.apply_hold(HoldEntityType::Batch, b1, "a").unwrap();
        hold_service.apply_hold(HoldEntityType::Batch, b2, "b").unwrap();
        hold_service
            .apply_hold(HoldEntityType::Inventory, lot.inventory_id, "c")
            .unwrap();
        hold_service.release_hold(h1.hold_id, None).unwrap();

        assert_eq!(hold_service.list_active_holds(None).unwrap().len(), 2);
        let batches = hold_service
            .list_active_holds(Some(HoldEntityType::Batch))
            .unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].entity_id, b2);
    }

    // ==========================================
    // 审计
    // ==========================================

    #[test]
    fn test_hold_and_release_are_audited() {
        let env = setup_env();
        let batch_id = insert_batch(&env, "B-020", "MAT-1", dec(5));
        let hold = env
            .state
            .hold_service
            .apply_hold(HoldEntityType::Batch, batch_id, "QC")
            .unwrap();
        env.state.hold_service.release_hold(hold.hold_id, Some("ok")).unwrap();

        let records = env
            .state
            .audit_log_repo
            .find_by_entity("BATCH", &batch_id.to_string())
            .unwrap();
        let actions: Vec<AuditAction> = records.iter().map(|r| r.action).collect();
        assert!(actions.contains(&AuditAction::Hold));
        assert!(actions.contains(&AuditAction::Release));
        assert!(records.iter().all(|r| r.actor == "tester"));
    }

    #[test]
    fn test_failing_audit_sink_does_not_roll_back() {
        let sink = Arc::new(FailingSink {
            calls: AtomicUsize::new(0),
        });
        let env = setup_env_with_sink(sink.clone());
        let batch_id = insert_batch(&env, "B-030", "MAT-1", dec(5));

        let hold = env
            .state
            .hold_service
            .apply_hold(HoldEntityType::Batch, batch_id, "QC")
            .unwrap();
        assert!(sink.calls.load(Ordering::SeqCst) >= 1);
        assert!(env
            .state
            .hold_service
            .is_entity_on_hold(HoldEntityType::Batch, batch_id)
            .unwrap());
        assert_eq!(env.state.hold_service.get_hold(hold.hold_id).unwrap().status, HoldStatus::Active);
    }

    // ==========================================
    // 并发施加
    // ==========================================

    #[test]
    fn test_concurrent_apply_hold_only_one_wins() {
        let env = setup_env();
        let batch_id = insert_batch(&env, "B-040", "MAT-1", dec(5));
        let hold_service = env.state.hold_service.clone();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let svc = hold_service.clone();
                thread::spawn(move || {
                    svc.apply_hold(HoldEntityType::Batch, batch_id, &format!("worker {}", i))
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let ok = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(ok, 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| e.kind() == ErrorKind::Conflict));
        assert_eq!(
            hold_service
                .list_active_holds(Some(HoldEntityType::Batch))
                .unwrap()
                .len(),
            1
        );
    }
}
