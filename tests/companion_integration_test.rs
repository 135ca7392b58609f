//! 自治核心集成测试：执行闸门、关系状态机、群聊轮转与记忆整理

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::NaiveDate;
    use companion::config::AppConfig;
    use companion::core::{
        Action, ActionError, ActionExecutor, ActionOutcome, AppContext, CompanionEvent, Dispatch,
        Orchestrator, PresenceMode,
    };
    use companion::llm::{LlmError, MockLlmClient};
    use companion::memory::{
        ConsolidationOutcome, InMemoryMessageStore, MemoryOwner, MemoryPipeline, MessageStore,
        SYSTEM_SENDER, USER_SENDER,
    };
    use companion::relationship::{CharacterState, Roster};

    fn quiet_config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.autonomy.screen_reaction_chance = 0.0;
        cfg.autonomy.random_event_chance = 0.0;
        cfg.autonomy.group_chat_chance = 0.0;
        cfg
    }

    fn setup(llm: &Arc<MockLlmClient>, cfg: AppConfig) -> (Arc<AppContext>, String) {
        let store: Arc<dyn MessageStore> = Arc::new(InMemoryMessageStore::new());
        let mut roster = Roster::new();
        roster.insert_character(CharacterState::new("ann", "Ann"));
        roster.insert_character(CharacterState::new("bo", "Bo"));
        let group_id = roster.create_group("Club", "a cozy book club");
        roster.add_member(&group_id, "ann", store.as_ref()).unwrap();
        roster.add_member(&group_id, "bo", store.as_ref()).unwrap();
        let ctx = Arc::new(AppContext::new(cfg, roster, store, llm.clone()));
        (ctx, group_id)
    }

    async fn finish(dispatch: Dispatch) -> Result<ActionOutcome, ActionError> {
        match dispatch {
            Dispatch::Started(handle) => handle.await.expect("action task panicked"),
            Dispatch::Dropped(kind) => panic!("{:?} was dropped", kind),
        }
    }

    /// 等待第一个满足条件的事件；超时即失败
    async fn wait_for<F>(
        events: &mut tokio::sync::broadcast::Receiver<CompanionEvent>,
        mut pred: F,
    ) -> CompanionEvent
    where
        F: FnMut(&CompanionEvent) -> bool,
    {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(30), events.recv())
                .await
                .expect("event not emitted in time")
                .expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    }

    fn afternoon() -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 6)
            .unwrap()
            .and_hms_opt(16, 0, 0)
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_drops_concurrent_actions() {
        let llm = Arc::new(MockLlmClient::new().with_delay(Duration::from_millis(50)));
        let (ctx, group_id) = setup(&llm, quiet_config());
        let executor = ActionExecutor::new(Arc::clone(&ctx));

        let first = executor.dispatch(Action::TextEvent {
            character_id: "ann".into(),
            topic: "the weather".into(),
        });
        assert!(first.is_started());
        assert!(ctx.gate.is_busy());

        for action in [
            Action::VisionEvent {
                character_id: "bo".into(),
            },
            Action::IgnoredResponse {
                character_id: "bo".into(),
                farewell: false,
            },
            Action::GroupConversation {
                group_id: group_id.clone(),
                initiator: companion::core::Speaker::User,
                opening_topic: None,
            },
        ] {
            assert!(matches!(executor.dispatch(action), Dispatch::Dropped(_)));
        }

        finish(first).await.unwrap();
        assert!(!ctx.gate.is_busy());
        assert_eq!(llm.max_in_flight(), 1);
        assert_eq!(llm.call_count(), 1);

        let again = executor.dispatch(Action::TextEvent {
            character_id: "bo".into(),
            topic: "music".into(),
        });
        assert!(again.is_started());
        finish(again).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_credential_aborts_without_side_effects() {
        let llm = Arc::new(MockLlmClient::new().without_credentials());
        let (ctx, _) = setup(&llm, quiet_config());
        let executor = ActionExecutor::new(Arc::clone(&ctx));

        let err = finish(executor.dispatch(Action::TextEvent {
            character_id: "ann".into(),
            topic: "a compliment".into(),
        }))
        .await
        .unwrap_err();

        assert!(matches!(err, ActionError::MissingCredential(_)));
        assert_eq!(llm.call_count(), 0);
        assert!(ctx.store.recent("ann", 10).unwrap().is_empty());
        let roster = ctx.roster.read().await;
        let ann = roster.character("ann").unwrap();
        assert!(!ann.is_waiting_for_reply);
        assert!(!ann.has_responded);
        assert!(!ctx.gate.is_busy());
    }

    #[tokio::test]
    async fn test_text_event_persists_and_starts_waiting() {
        let llm = Arc::new(MockLlmClient::new().with_responses(["Good morning! [INTIMACY_CHANGE=2]"]));
        let (ctx, _) = setup(&llm, quiet_config());
        let executor = ActionExecutor::new(Arc::clone(&ctx));

        let outcome = finish(executor.dispatch(Action::TextEvent {
            character_id: "ann".into(),
            topic: "morning greeting".into(),
        }))
        .await
        .unwrap();

        let ActionOutcome::Spoke { message_id, text, .. } = outcome else {
            panic!("expected a spoken line");
        };
        assert_eq!(text, "Good morning!");
        let log = ctx.store.recent("ann", 10).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(Some(log[0].id), message_id);
        assert!(llm.last_prompt().unwrap().contains("morning greeting"));

        let roster = ctx.roster.read().await;
        let ann = roster.character("ann").unwrap();
        assert_eq!(ann.intimacy_score, 2.0);
        assert!(ann.is_waiting_for_reply);
        assert!(ann.has_responded);
        assert!(!ann.is_autonomy_candidate());
    }

    #[tokio::test]
    async fn test_vision_capture_failure_has_no_side_effects() {
        let llm = Arc::new(MockLlmClient::new());
        let (ctx, _) = setup(&llm, quiet_config());
        let executor = ActionExecutor::new(Arc::clone(&ctx));

        let err = finish(executor.dispatch(Action::VisionEvent {
            character_id: "ann".into(),
        }))
        .await
        .unwrap_err();

        assert!(matches!(err, ActionError::Capture(_)));
        assert_eq!(llm.call_count(), 0);
        assert!(ctx.store.recent("ann", 1).unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_group_message_runs_bounded_loop() {
        let llm = Arc::new(MockLlmClient::new().with_responses([
            "decision: bo\nreason: the user asked Bo",
            "I'm reading a mystery novel.",
            "decision: Ann\nreason: she has not spoken",
            "Ooh, which one?",
        ]));
        let mut cfg = quiet_config();
        cfg.group.max_loop_turns = 2;
        let (ctx, group_id) = setup(&llm, cfg);
        let orchestrator = Orchestrator::new(Arc::clone(&ctx));

        let dispatch = orchestrator
            .send_group_message(&group_id, "What are you reading?")
            .await
            .unwrap();
        let ActionOutcome::Group(report) = finish(dispatch).await.unwrap() else {
            panic!("expected a group report");
        };

        assert_eq!(report.turns, 2);
        assert_eq!(report.speakers, ["bo", "ann"]);
        let log = ctx.store.recent(&group_id, 3).unwrap();
        let senders: Vec<&str> = log.iter().map(|m| m.sender_id.as_str()).collect();
        assert_eq!(senders, [USER_SENDER, "bo", "ann"]);
        assert!(!ctx.gate.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_group_generation_failure_ends_loop_and_still_refreshes() {
        let llm = Arc::new(MockLlmClient::new().with_responses(["decision: bo\nreason: asked"]));
        llm.push_error(LlmError::ApiError("boom".into()));
        let (ctx, group_id) = setup(&llm, quiet_config());
        let orchestrator = Orchestrator::new(Arc::clone(&ctx));
        let mut events = ctx.subscribe();

        let dispatch = orchestrator
            .send_group_message(&group_id, "What are you reading?")
            .await
            .unwrap();
        let err = finish(dispatch).await.unwrap_err();
        assert!(matches!(err, ActionError::Backend(_)));
        assert!(!ctx.gate.is_busy());

        let finished = wait_for(&mut events, |e| matches!(e, CompanionEvent::GroupLoopFinished { .. })).await;
        let CompanionEvent::GroupLoopFinished { turns, reason, .. } = finished else {
            unreachable!()
        };
        assert_eq!((turns, reason.as_str()), (0, "error"));
        wait_for(&mut events, |e| {
            matches!(e, CompanionEvent::ContextUpdated { owner_id, .. } if *owner_id == group_id)
        })
        .await;

        let last = ctx.store.recent(&group_id, 1).unwrap();
        assert_eq!(last[0].sender_id, USER_SENDER);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_group_turn_discards_result() {
        let llm = Arc::new(MockLlmClient::new().with_responses([
            "decision: ann\nreason: asked",
            "Sure! [INTIMACY_CHANGE=10][FAREWELL]",
        ]));
        let mut cfg = quiet_config();
        cfg.group.min_pacing_ms = 60_000;
        cfg.group.max_pacing_ms = 60_000;
        let (ctx, group_id) = setup(&llm, cfg);
        let orchestrator = Orchestrator::new(Arc::clone(&ctx));

        let dispatch = orchestrator
            .send_group_message(&group_id, "anyone around?")
            .await
            .unwrap();
        let token = ctx.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });
        let err = finish(dispatch).await.unwrap_err();
        assert!(matches!(err, ActionError::Cancelled));
        assert!(!ctx.gate.is_busy());

        let roster = ctx.roster.read().await;
        let ann = roster.character("ann").unwrap();
        assert_eq!(ann.intimacy_score, 0.0);
        assert!(!ann.has_said_farewell);
        let last = ctx.store.recent(&group_id, 1).unwrap();
        assert_eq!(last[0].text(), "anyone around?");
    }

    #[tokio::test(start_paused = true)]
    async fn test_group_context_refresh_fires_after_loop() {
        let llm = Arc::new(MockLlmClient::new().with_responses([
            "decision: bo\nreason: asked",
            "Just got back from the library.",
            "decision: NONE\nreason: settled",
            "Bo is telling the user about a library visit at the book club.",
        ]));
        let (ctx, group_id) = setup(&llm, quiet_config());
        let orchestrator = Orchestrator::new(Arc::clone(&ctx));
        let mut events = ctx.subscribe();

        let dispatch = orchestrator
            .send_group_message(&group_id, "Where have you been?")
            .await
            .unwrap();
        let ActionOutcome::Group(report) = finish(dispatch).await.unwrap() else {
            panic!("expected a group report");
        };
        assert_eq!(report.speakers, ["bo"]);

        let updated = wait_for(&mut events, |e| {
            matches!(e, CompanionEvent::ContextUpdated { owner_id, .. } if *owner_id == group_id)
        })
        .await;
        let CompanionEvent::ContextUpdated { summary, .. } = updated else {
            unreachable!()
        };
        assert_eq!(summary, "Bo is telling the user about a library visit at the book club.");
        assert_eq!(
            ctx.roster.read().await.group(&group_id).unwrap().current_context_summary,
            summary
        );
        assert!(llm.last_prompt().unwrap().contains("Just got back from the library."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_group_message_while_busy_is_kept_but_loop_dropped() {
        let llm = Arc::new(MockLlmClient::new());
        let (ctx, group_id) = setup(&llm, quiet_config());
        let orchestrator = Orchestrator::new(Arc::clone(&ctx));

        let permit = ctx
            .gate
            .try_acquire(companion::core::ActionKind::TextEvent)
            .unwrap();
        let dispatch = orchestrator
            .send_group_message(&group_id, "anyone here?")
            .await
            .unwrap();
        assert!(matches!(dispatch, Dispatch::Dropped(_)));
        drop(permit);

        let last = ctx.store.recent(&group_id, 1).unwrap();
        assert_eq!(last[0].text(), "anyone here?");
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_sentinel_keeps_watermark_until_real_summary() {
        let llm = Arc::new(MockLlmClient::new().with_responses([
            "Nothing to summarize.",
            "The user told Ann they adopted a cat.",
            r#"{"user_pet": "cat"}"#,
        ]));
        let (ctx, _) = setup(&llm, quiet_config());
        for i in 0..20 {
            let sender = if i % 2 == 0 { USER_SENDER } else { "ann" };
            ctx.append_text("ann", sender, &format!("line {}", i)).unwrap();
        }
        let pipeline = MemoryPipeline::new(Arc::clone(&ctx));
        let owner = MemoryOwner::Character("ann".into());

        let first = pipeline.consolidate(&owner).await.unwrap();
        assert_eq!(first, ConsolidationOutcome::NothingToSummarize { pending: 20 });
        assert_eq!(ctx.roster.read().await.character("ann").unwrap().last_summarized_message_id, 0);

        for i in 20..25 {
            ctx.append_text("ann", USER_SENDER, &format!("line {}", i)).unwrap();
        }
        let last_id = ctx.store.recent("ann", 1).unwrap()[0].id;

        let second = pipeline.consolidate(&owner).await.unwrap();
        assert_eq!(
            second,
            ConsolidationOutcome::Summarized {
                summary: "The user told Ann they adopted a cat.".into(),
                watermark: last_id,
                facts: 1,
            }
        );
        let prompt = &llm.requests()[1][0].content;
        assert!(prompt.contains("line 0") && prompt.contains("line 24"));

        let roster = ctx.roster.read().await;
        let ann = roster.character("ann").unwrap();
        assert_eq!(ann.last_summarized_message_id, last_id);
        assert_eq!(ann.knowledge_library.get("user_pet").map(String::as_str), Some("cat"));
        let group = roster.group(ann.group_id.as_deref().unwrap()).unwrap();
        assert!(group.long_term_memories[0].starts_with("(personal) Ann:"));

        drop(roster);
        let third = pipeline.consolidate(&owner).await.unwrap();
        assert_eq!(third, ConsolidationOutcome::BelowThreshold { pending: 0 });
    }

    #[tokio::test]
    async fn test_backend_error_keeps_watermark() {
        let llm = Arc::new(MockLlmClient::new());
        llm.push_error(LlmError::ApiError("overloaded".into()));
        llm.push_response("Ann and the user talked about the weekend.");
        let (ctx, _) = setup(&llm, quiet_config());
        for i in 0..20 {
            ctx.append_text("ann", USER_SENDER, &format!("line {}", i)).unwrap();
        }
        let pipeline = MemoryPipeline::new(Arc::clone(&ctx));
        let owner = MemoryOwner::Character("ann".into());

        let err = pipeline.consolidate(&owner).await.unwrap_err();
        assert!(matches!(err, ActionError::Backend(_)));
        {
            let roster = ctx.roster.read().await;
            let ann = roster.character("ann").unwrap();
            assert_eq!(ann.last_summarized_message_id, 0);
            assert!(ann.long_term_memories.is_empty());
        }

        let retry = pipeline.consolidate(&owner).await.unwrap();
        let ConsolidationOutcome::Summarized { watermark, .. } = retry else {
            panic!("expected a summary on retry, got {:?}", retry);
        };
        assert_eq!(watermark, ctx.store.recent("ann", 1).unwrap()[0].id);
    }

    #[tokio::test]
    async fn test_direct_chat_failure_writes_error_line() {
        let llm = Arc::new(MockLlmClient::new());
        llm.push_error(LlmError::ApiError("boom".into()));
        let (ctx, _) = setup(&llm, quiet_config());
        let orchestrator = Orchestrator::new(Arc::clone(&ctx));

        let err = orchestrator.send_user_message("ann", "hello?").await.unwrap_err();
        assert!(matches!(err, ActionError::Backend(_)));

        let log = ctx.store.recent("ann", 5).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].sender_id, USER_SENDER);
        assert_eq!(log[1].sender_id, SYSTEM_SENDER);
        assert_eq!(log[1].payload.kind, "system");
        assert_eq!(log[1].text(), ctx.config.app.error_message);
        assert!(!ctx.roster.read().await.character("ann").unwrap().is_waiting_for_reply);
    }

    #[tokio::test]
    async fn test_direct_chat_to_off_character_is_rejected() {
        let llm = Arc::new(MockLlmClient::new());
        let (ctx, _) = setup(&llm, quiet_config());
        ctx.roster.write().await.character_mut("bo").unwrap().set_locked(true);
        let orchestrator = Orchestrator::new(Arc::clone(&ctx));

        let err = orchestrator.send_user_message("bo", "hi").await.unwrap_err();
        assert!(matches!(err, ActionError::Inactive(_)));
        assert!(ctx.store.recent("bo", 1).unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignore_escalation_and_reset() {
        let llm = Arc::new(MockLlmClient::new().with_responses([
            "Hey, are you there?",
            "Fine. Goodbye then. [FAREWELL]",
            "Oh, you're back!",
        ]));
        let (ctx, _) = setup(&llm, quiet_config());
        let base = ctx.config.relationship.base_wait();
        ctx.roster
            .write()
            .await
            .character_mut("ann")
            .unwrap()
            .start_waiting_for_reply(base);
        let orchestrator = Orchestrator::new(Arc::clone(&ctx));

        let mut dispatches = orchestrator.tick(base, afternoon()).await;
        assert_eq!(dispatches.len(), 1);
        finish(dispatches.remove(0)).await.unwrap();
        {
            let roster = ctx.roster.read().await;
            let ann = roster.character("ann").unwrap();
            assert_eq!(ann.ignore_count, 1);
            assert!(ann.is_waiting_for_reply);
            assert_eq!(ann.intimacy_score, ctx.config.relationship.ignore_penalty);
        }

        assert!(orchestrator.tick(base, afternoon()).await.is_empty());

        let mut dispatches = orchestrator.tick(base, afternoon()).await;
        assert_eq!(dispatches.len(), 1);
        let outcome = finish(dispatches.remove(0)).await.unwrap();
        assert!(matches!(outcome, ActionOutcome::Spoke { farewell: true, .. }));
        {
            let roster = ctx.roster.read().await;
            let ann = roster.character("ann").unwrap();
            assert!(ann.has_said_farewell);
            assert!(!ann.is_waiting_for_reply);
            assert!(!ann.is_autonomy_candidate());
        }
        assert!(orchestrator.tick(base * 10, afternoon()).await.is_empty());

        orchestrator.send_user_message("ann", "sorry, I was away").await.unwrap();
        let roster = ctx.roster.read().await;
        let ann = roster.character("ann").unwrap();
        assert!(!ann.has_said_farewell);
        assert_eq!(ann.ignore_count, 0);
        assert!(ann.is_waiting_for_reply);
    }

    #[tokio::test]
    async fn test_wait_timer_frozen_when_presence_off() {
        let llm = Arc::new(MockLlmClient::new());
        let (ctx, _) = setup(&llm, quiet_config());
        let base = ctx.config.relationship.base_wait();
        ctx.roster
            .write()
            .await
            .character_mut("ann")
            .unwrap()
            .start_waiting_for_reply(base);
        let orchestrator = Orchestrator::new(Arc::clone(&ctx));
        orchestrator.set_presence(PresenceMode::Off).await;

        assert!(orchestrator.tick(base * 5, afternoon()).await.is_empty());
        let roster = ctx.roster.read().await;
        let ann = roster.character("ann").unwrap();
        assert_eq!(ann.ignore_count, 0);
        assert!(ann.is_waiting_for_reply);
        assert_eq!(llm.call_count(), 0);
    }
}
