// ==========================================
// 工艺路线门控 / 工序与模板状态集成测试
// ==========================================
// 职责: 验证顺序/并行路线放行、工序实例化、开工确认与放行、模板状态迁移
// ==========================================


#[cfg(test)]
mod routing_operation_test {
    use mes_execution::domain::types::{
        AuditAction, OperationStatus, ProcessStatus, RoutingStepStatus, RoutingType,
    };
    use mes_execution::domain::Operation;
    use mes_execution::engine::ErrorKind;
    use rust_decimal::Decimal;

    use crate::test_helpers::*;

    // ==========================================
    // 路线门控
    // ==========================================

    #[test]
    fn test_sequential_gate_waits_for_mandatory_predecessor() {
        let env = setup_env();
        let (_, routing_id, ops) = create_running_process(
            &env,
            "SEQ",
            RoutingType::Sequential,
            &[(1, "CUT", true), (2, "WELD", true), (3, "PAINT", false)],
            1,
        );
        let routing = &env.state.routing_service;
        let step1 = ops[0].routing_step_id.unwrap();

        env.state
            .routing_repo
            .update_step_status(step1, RoutingStepStatus::InProgress)
            .unwrap();
        assert!(!routing.can_operation_proceed(ops[1].operation_id).unwrap());

        env.state
            .routing_repo
            .update_step_status(step1, RoutingStepStatus::Completed)
            .unwrap();
        assert!(routing.can_operation_proceed(ops[1].operation_id).unwrap());

        // 首步骤始终放行
        assert!(routing.can_operation_proceed(ops[0].operation_id).unwrap());
        // 步骤 3 仍等待必经步骤 2
        assert!(!routing.can_operation_proceed(ops[2].operation_id).unwrap());
        assert!(!routing.is_routing_complete(routing_id).unwrap());
    }

    #[test]
    fn test_non_mandatory_predecessor_is_ignored() {
        let env = setup_env();
        let (_, routing_id, ops) = create_running_process(
            &env,
            "SEQ-OPT",
            RoutingType::Sequential,
            &[(1, "CUT", true), (2, "DEBURR", false), (3, "PACK", true)],
            1,
        );
        env.state
            .routing_repo
            .update_step_status(ops[0].routing_step_id.unwrap(), RoutingStepStatus::Completed)
            .unwrap();
        assert!(env
            .state
            .routing_service
            .can_operation_proceed(ops[2].operation_id)
            .unwrap());

        env.state
            .routing_repo
            .update_step_status(ops[2].routing_step_id.unwrap(), RoutingStepStatus::Completed)
            .unwrap();
        assert!(env.state.routing_service.is_routing_complete(routing_id).unwrap());
    }

    #[test]
    fn test_parallel_gate_checks_own_step_only() {
        let env = setup_env();
        let (_, _, ops) = create_running_process(
            &env,
            "PAR",
            RoutingType::Parallel,
            &[(1, "COAT", true), (2, "DRILL", true)],
            1,
        );
        assert!(ops.iter().all(|o| o.status == OperationStatus::Ready));
        assert!(env
            .state
            .routing_service
            .can_operation_proceed(ops[1].operation_id)
            .unwrap());

        env.state
            .routing_repo
            .update_step_status(ops[1].routing_step_id.unwrap(), RoutingStepStatus::OnHold)
            .unwrap();
        assert!(!env
            .state
            .routing_service
            .can_operation_proceed(ops[1].operation_id)
            .unwrap());
    }

    #[test]
    fn test_unbound_operation_always_proceeds() {
        let env = setup_env();
        let process_id = env.state.process_repo.create("ADHOC").unwrap();
        let op_id = insert_unbound_operation(&env, process_id, "REWORK", OperationStatus::Ready);
        assert!(env.state.routing_service.can_operation_proceed(op_id).unwrap());

        let err = env.state.routing_service.can_operation_proceed(9999).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_step_bound_from_routing_side_still_gates() {
        let env = setup_env();
        let (process_id, _, step_ids) = create_process_with_routing(
            &env,
            "BACKREF",
            RoutingType::Sequential,
            &[(1, "CUT", true), (2, "WELD", true)],
        );
        let op_id = insert_unbound_operation(&env, process_id, "WELD", OperationStatus::Ready);
        env.state.routing_repo.bind_operation(step_ids[1], op_id).unwrap();

        let step = env
            .state
            .routing_repo
            .find_step_by_operation(op_id)
            .unwrap()
            .unwrap();
        assert_eq!(step.routing_step_id, step_ids[1]);
        assert!(!env.state.routing_service.can_operation_proceed(op_id).unwrap());

        env.state
            .routing_repo
            .update_step_status(step_ids[0], RoutingStepStatus::Completed)
            .unwrap();
        assert!(env.state.routing_service.can_operation_proceed(op_id).unwrap());
    }

    #[test]
    fn test_next_and_parallel_step_queries() {
        let env = setup_env();
        let (_, routing_id, _) = create_process_with_routing(
            &env,
            "QUERY",
            RoutingType::Sequential,
            &[(10, "A", true), (20, "B1", true), (20, "B2", true), (30, "C", true)],
        );
        let routing = &env.state.routing_service;

        let next: Vec<i32> = routing
            .get_next_steps(routing_id, 10)
            .unwrap()
            .iter()
            .map(|s| s.sequence_number)
            .collect();
        assert_eq!(next, vec![20, 20, 30]);

        let siblings = routing.get_parallel_steps(routing_id, 20).unwrap();
        assert_eq!(siblings.len(), 2);
        assert!(routing.get_parallel_steps(routing_id, 25).unwrap().is_empty());

        assert_eq!(
            routing.get_next_steps(404, 0).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    // ==========================================
    // 工序实例化 / 开工 / 确认
    // ==========================================

    #[test]
    fn test_instantiate_requires_active_process() {
        let env = setup_env();
        let (process_id, _, _) = create_process_with_routing(
            &env,
            "DRAFTY",
            RoutingType::Sequential,
            &[(1, "CUT", true)],
        );

        let err = env
            .state
            .operation_controller
            .instantiate_operations(process_id, Some(1), dec(10))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(
            err.to_string(),
            format!(
                "Process {} status is DRAFT; must be ACTIVE to instantiate operations",
                process_id
            )
        );
    }

    #[test]
    fn test_instantiate_binds_steps_once() {
        let env = setup_env();
        let (process_id, routing_id, ops) = create_running_process(
            &env,
            "BIND",
            RoutingType::Sequential,
            &[(1, "CUT", true), (1, "CUT-B", true), (2, "WELD", true)],
            7,
        );
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0].status, OperationStatus::Ready);
        assert_eq!(ops[1].status, OperationStatus::Ready);
        assert_eq!(ops[2].status, OperationStatus::NotStarted);
        assert!(ops.iter().all(|o| o.order_line_id == Some(7)));

        let plan = env.state.routing_repo.load_plan(routing_id).unwrap().unwrap();
        for (op, step) in ops.iter().zip(plan.steps.iter()) {
            assert_eq!(step.operation_id, Some(op.operation_id));
            assert_eq!(op.routing_step_id, Some(step.routing_step_id));
        }

        let err = env
            .state
            .operation_controller
            .instantiate_operations(process_id, Some(8), dec(10))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.to_string().contains("allocation already exists"));
    }

    #[test]
    fn test_confirm_promotes_only_same_order_line() {
        let env = setup_env();
        let (process_id, _, ops) = create_running_process(
            &env,
            "ORDER-LINES",
            RoutingType::Sequential,
            &[(1, "CUT", true), (2, "WELD", true)],
            1,
        );
        // 同模板下另一订单行的临时工序，序号更低
        let now = chrono::Local::now().naive_local();
        let foreign_id = env
            .state
            .operation_repo
            .insert(&Operation {
                operation_id: 0,
                process_id,
                order_line_id: Some(2),
                routing_step_id: None,
                operation_code: "REWORK".to_string(),
                operation_type: "REWORK".to_string(),
                sequence_number: 0,
                status: OperationStatus::NotStarted,
                target_qty: dec(5),
                confirmed_qty: Decimal::ZERO,
                created_at: now,
                updated_at: now,
            })
            .unwrap();

        let controller = &env.state.operation_controller;
        controller.start_operation(ops[0].operation_id).unwrap();
        let confirmation = controller.confirm_operation(ops[0].operation_id, dec(100)).unwrap();
        assert_eq!(confirmation.promoted_operation_ids, vec![ops[1].operation_id]);

        let foreign = env.state.operation_repo.find_by_id(foreign_id).unwrap().unwrap();
        assert_eq!(foreign.status, OperationStatus::NotStarted);

        let err = controller
            .instantiate_operations(process_id, Some(2), dec(5))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_start_requires_routing_gate() {
        let env = setup_env();
        let (_, _, ops) = create_running_process(
            &env,
            "GATE",
            RoutingType::Sequential,
            &[(1, "CUT", true), (2, "WELD", true)],
            1,
        );
        let controller = &env.state.operation_controller;

        // NOT_STARTED 工序不可开工
        let err = controller.start_operation(ops[1].operation_id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        let started = controller.start_operation(ops[0].operation_id).unwrap();
        assert_eq!(started.status, OperationStatus::InProgress);
        let step = env
            .state
            .routing_repo
            .find_step(ops[0].routing_step_id.unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(step.status, RoutingStepStatus::InProgress);
    }

    #[test]
    fn test_confirm_promotes_next_sequence_group() {
        let env = setup_env();
        let (process_id, _, ops) = create_running_process(
            &env,
            "FLOW",
            RoutingType::Sequential,
            &[(1, "CUT", true), (2, "WELD", true), (3, "PACK", true)],
            1,
        );
        let controller = &env.state.operation_controller;

        assert!(controller
            .get_next_operation_to_ready(process_id, Some(1))
            .unwrap()
            .is_empty());

        controller.start_operation(ops[0].operation_id).unwrap();
        let confirmation = controller
            .confirm_operation(ops[0].operation_id, dec(98))
            .unwrap();
        assert_eq!(confirmation.operation.status, OperationStatus::Confirmed);
        assert_eq!(confirmation.operation.confirmed_qty, dec(98));
        assert_eq!(confirmation.promoted_operation_ids, vec![ops[1].operation_id]);
        assert!(!confirmation.routing_complete);

        assert_eq!(
            controller.get_operation(ops[1].operation_id).unwrap().status,
            OperationStatus::Ready
        );
        assert_eq!(
            controller.get_operation(ops[2].operation_id).unwrap().status,
            OperationStatus::NotStarted
        );

        controller.start_operation(ops[1].operation_id).unwrap();
        controller.confirm_operation(ops[1].operation_id, dec(98)).unwrap();
        controller.start_operation(ops[2].operation_id).unwrap();
        let last = controller.confirm_operation(ops[2].operation_id, dec(97)).unwrap();
        assert!(last.routing_complete);
        assert!(last.promoted_operation_ids.is_empty());
    }

    #[test]
    fn test_confirm_rejects_negative_quantity() {
        let env = setup_env();
        let (_, _, ops) = create_running_process(
            &env,
            "NEG",
            RoutingType::Sequential,
            &[(1, "CUT", true)],
            1,
        );
        let controller = &env.state.operation_controller;
        controller.start_operation(ops[0].operation_id).unwrap();
        let err = controller
            .confirm_operation(ops[0].operation_id, dec(-1))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_block_and_unblock_operation() {
        let env = setup_env();
        let (_, _, ops) = create_running_process(
            &env,
            "BLOCK",
            RoutingType::Sequential,
            &[(1, "CUT", true), (2, "WELD", true)],
            1,
        );
        let controller = &env.state.operation_controller;
        let op_id = ops[0].operation_id;

        let blocked = controller.block_operation(op_id, "missing fixture").unwrap();
        assert_eq!(blocked.status, OperationStatus::Blocked);

        let err = controller.block_operation(op_id, "again").unwrap_err();
        assert!(err.to_string().contains("already blocked"));

        let ready = controller.unblock_operation(op_id).unwrap();
        assert_eq!(ready.status, OperationStatus::Ready);
        assert_eq!(
            controller.unblock_operation(op_id).unwrap_err().kind(),
            ErrorKind::InvalidState
        );

        controller.start_operation(op_id).unwrap();
        controller.confirm_operation(op_id, dec(100)).unwrap();
        let err = controller.block_operation(op_id, "too late").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert!(err.to_string().contains("cannot block a confirmed operation"));
    }

    // ==========================================
    // 工艺模板状态
    // ==========================================

    #[test]
    fn test_activate_process_emits_status_change_audit() {
        let env = setup_env();
        let process_id = env.state.process_repo.create("AUDITED").unwrap();

        let process = env.state.operation_controller.activate_process(process_id).unwrap();
        assert_eq!(process.status, ProcessStatus::Active);

        let records = env
            .state
            .audit_log_repo
            .find_by_entity("PROCESS", &process_id.to_string())
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, AuditAction::StatusChange);
        assert_eq!(records[0].detail, "DRAFT -> ACTIVE");
        assert_eq!(records[0].actor, "tester");

        // 同状态为无操作，不产生审计
        env.state.operation_controller.activate_process(process_id).unwrap();
        let records = env
            .state
            .audit_log_repo
            .find_by_entity("PROCESS", &process_id.to_string())
            .unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_return_to_draft_rejected_on_every_path() {
        let env = setup_env();
        let controller = &env.state.operation_controller;
        let process_id = env.state.process_repo.create("NO-DRAFT").unwrap();
        controller.activate_process(process_id).unwrap();

        let err = controller
            .set_process_status(process_id, ProcessStatus::Draft)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert!(err.to_string().contains("ACTIVE"));
        assert!(err.to_string().contains("DRAFT"));

        let inactive = controller.deactivate_process(process_id).unwrap();
        assert_eq!(inactive.status, ProcessStatus::Inactive);
        assert!(controller
            .set_process_status(process_id, ProcessStatus::Draft)
            .is_err());

        let reactivated = controller.activate_process(process_id).unwrap();
        assert_eq!(reactivated.status, ProcessStatus::Active);
    }

    #[test]
    fn test_deactivate_draft_is_rejected() {
        let env = setup_env();
        let process_id = env.state.process_repo.create("STILL-DRAFT").unwrap();
        let err = env
            .state
            .operation_controller
            .deactivate_process(process_id)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(
            env.state
                .operation_controller
                .activate_process(9999)
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );
    }
}
