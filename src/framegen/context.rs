use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Uninitialized,
    Created,
    Configured,
    Dispatching,
    Destroyed,
}

/// Whether a dispatch reached the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Recorded,
    /// Frame generation is disabled for this frame.
    Skipped,
}

/// Drives a [`FrameGenerationBackend`] through its lifecycle.
///
/// Every dispatch must be preceded by its own configure call for the current
/// frame id. The frame id only moves forward, one step per [`end_frame`].
///
/// [`end_frame`]: FrameGenerationContext::end_frame
pub struct FrameGenerationContext<B: FrameGenerationBackend> {
    backend: B,
    handle: Option<ContextHandle>,
    state: ContextState,
    frame_id: u64,
    config: Option<ConfigureDesc>,
    armed: bool,
    prepared_frame: Option<u64>,
    producer: Option<Box<dyn InterpolatedFrameProducer>>,
}

impl<B: FrameGenerationBackend> FrameGenerationContext<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            handle: None,
            state: ContextState::Uninitialized,
            frame_id: 0,
            config: None,
            armed: false,
            prepared_frame: None,
            producer: None,
        }
    }

    pub fn with_producer(mut self, producer: Box<dyn InterpolatedFrameProducer>) -> Self {
        self.producer = Some(producer);
        self
    }

    #[inline]
    pub fn state(&self) -> ContextState {
        self.state
    }

    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    pub fn create(&mut self, desc: &CreateDesc) -> Result<(), FrameGenError> {
        if self.state != ContextState::Uninitialized {
            return Err(self.invalid_state("create"));
        }

        let handle = self.backend.create_context(desc)?;

        log::info!(
            "Created frame generation context {:?} for {}x{} {:?}",
            handle,
            desc.display_size.width,
            desc.display_size.height,
            desc.back_buffer_format
        );

        self.handle = Some(handle);
        self.state = ContextState::Created;

        Ok(())
    }

    /// Applies `desc` and arms exactly one dispatch.
    pub fn configure(&mut self, desc: ConfigureDesc) -> Result<(), FrameGenError> {
        let handle = self.live_handle("configure")?;

        if desc.frame_id != self.frame_id {
            return Err(FrameGenError::StaleFrameId {
                expected: self.frame_id,
                found: desc.frame_id,
            });
        }

        if desc.dispatch_mode == DispatchMode::Callback && self.producer.is_none() {
            return Err(FrameGenError::MissingProducer);
        }

        self.backend.configure(handle, &desc)?;

        self.config = Some(desc);
        self.armed = true;
        self.state = ContextState::Configured;

        Ok(())
    }

    pub fn dispatch_prepare(
        &mut self,
        desc: &PrepareDesc,
    ) -> Result<DispatchOutcome, FrameGenError> {
        let (handle, config) = self.take_armed("dispatch prepare", desc.frame_id)?;

        self.state = ContextState::Dispatching;

        if !config.enabled {
            self.prepared_frame = Some(desc.frame_id);
            return Ok(DispatchOutcome::Skipped);
        }

        self.backend.dispatch_prepare(handle, desc)?;
        self.prepared_frame = Some(desc.frame_id);

        Ok(DispatchOutcome::Recorded)
    }

    /// Records the generate dispatch in manual mode.
    pub fn dispatch_generate(
        &mut self,
        desc: &GenerateDesc,
    ) -> Result<DispatchOutcome, FrameGenError> {
        let (handle, config) = self.take_armed("dispatch generate", desc.frame_id)?;

        if config.dispatch_mode != DispatchMode::Manual {
            return Err(FrameGenError::WrongDispatchMode {
                operation: "dispatch generate",
                mode: config.dispatch_mode,
            });
        }

        self.check_prepared(desc.frame_id)?;
        self.state = ContextState::Dispatching;

        if !config.enabled {
            return Ok(DispatchOutcome::Skipped);
        }

        self.backend.dispatch_generate(handle, desc)?;

        Ok(DispatchOutcome::Recorded)
    }

    /// Lets the engine request the interpolated frame at present time.
    pub fn present(&mut self, desc: &GenerateDesc) -> Result<DispatchOutcome, FrameGenError> {
        let (handle, config) = self.take_armed("present", desc.frame_id)?;

        if config.dispatch_mode != DispatchMode::Callback {
            return Err(FrameGenError::WrongDispatchMode {
                operation: "present",
                mode: config.dispatch_mode,
            });
        }

        self.check_prepared(desc.frame_id)?;
        self.state = ContextState::Dispatching;

        if !config.enabled {
            return Ok(DispatchOutcome::Skipped);
        }

        let producer = self
            .producer
            .as_mut()
            .ok_or(FrameGenError::MissingProducer)?;

        producer.produce(&mut self.backend, handle, desc)?;

        Ok(DispatchOutcome::Recorded)
    }

    /// Runs one frame's worth of configure and dispatch calls.
    ///
    /// Both descriptors are stamped with the current frame id. Generation goes
    /// through [`dispatch_generate`] or [`present`] depending on the dispatch
    /// mode in `settings`.
    ///
    /// [`dispatch_generate`]: FrameGenerationContext::dispatch_generate
    /// [`present`]: FrameGenerationContext::present
    pub fn dispatch_frame(
        &mut self,
        settings: &GenerationSettings,
        mut prepare: PrepareDesc,
        mut generate: GenerateDesc,
    ) -> Result<DispatchOutcome, FrameGenError> {
        prepare.frame_id = self.frame_id;
        generate.frame_id = self.frame_id;

        self.configure(ConfigureDesc::for_frame(settings, self.frame_id))?;
        self.dispatch_prepare(&prepare)?;

        self.configure(ConfigureDesc::for_frame(settings, self.frame_id))?;

        match settings.dispatch_mode {
            DispatchMode::Manual => self.dispatch_generate(&generate),
            DispatchMode::Callback => self.present(&generate),
        }
    }

    pub fn interpolation_output(&mut self) -> Result<FrameResource, FrameGenError> {
        let handle = self.live_handle("query the interpolation output")?;

        self.backend.query_interpolation_output(handle)
    }

    /// Closes the current frame and returns the id of the next one.
    ///
    /// The id advances whether or not anything was generated.
    pub fn end_frame(&mut self) -> u64 {
        self.frame_id += 1;
        self.armed = false;

        self.frame_id
    }

    pub fn destroy(&mut self) -> Result<(), FrameGenError> {
        match self.state {
            ContextState::Destroyed => Err(FrameGenError::AlreadyDestroyed),
            ContextState::Uninitialized => Err(self.invalid_state("destroy")),
            _ => {
                if let Some(handle) = self.handle.take() {
                    self.backend.destroy_context(handle);
                }

                self.state = ContextState::Destroyed;
                self.config = None;
                self.armed = false;

                Ok(())
            }
        }
    }

    fn live_handle(&self, operation: &'static str) -> Result<ContextHandle, FrameGenError> {
        match (self.state, self.handle) {
            (ContextState::Destroyed, _) => Err(FrameGenError::AlreadyDestroyed),
            (ContextState::Uninitialized, _) | (_, None) => Err(self.invalid_state(operation)),
            (_, Some(handle)) => Ok(handle),
        }
    }

    fn take_armed(
        &mut self,
        operation: &'static str,
        frame_id: u64,
    ) -> Result<(ContextHandle, ConfigureDesc), FrameGenError> {
        let handle = self.live_handle(operation)?;

        if frame_id != self.frame_id {
            return Err(FrameGenError::StaleFrameId {
                expected: self.frame_id,
                found: frame_id,
            });
        }

        match self.config {
            Some(config) if self.armed && config.frame_id == self.frame_id => {
                self.armed = false;
                Ok((handle, config))
            }
            _ => Err(FrameGenError::NotConfigured(operation)),
        }
    }

    fn check_prepared(&self, frame_id: u64) -> Result<(), FrameGenError> {
        if self.prepared_frame == Some(frame_id) {
            Ok(())
        } else {
            Err(FrameGenError::PrepareMissing(frame_id))
        }
    }

    fn invalid_state(&self, operation: &'static str) -> FrameGenError {
        FrameGenError::InvalidState {
            operation,
            state: self.state,
        }
    }
}

impl<B: FrameGenerationBackend> Drop for FrameGenerationContext<B> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            log::debug!("Dropping frame generation context {:?}", handle);
            self.backend.destroy_context(handle);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        Create,
        Configure(u64),
        Prepare(u64),
        Generate { frame_id: u64, reset: bool },
        Query,
        Destroy,
    }

    /// Records every engine call in order.
    #[derive(Default, Clone)]
    pub struct RecordingBackend {
        pub calls: Rc<RefCell<Vec<Call>>>,
        pub reject_create: bool,
        pub fail_prepare: bool,
    }

    impl FrameGenerationBackend for RecordingBackend {
        fn create_context(&mut self, _desc: &CreateDesc) -> Result<ContextHandle, FrameGenError> {
            if self.reject_create {
                return Err(FrameGenError::ContextRejected("unsupported".into()));
            }
            self.calls.borrow_mut().push(Call::Create);
            Ok(ContextHandle(7))
        }

        fn configure(
            &mut self,
            _context: ContextHandle,
            desc: &ConfigureDesc,
        ) -> Result<(), FrameGenError> {
            self.calls.borrow_mut().push(Call::Configure(desc.frame_id));
            Ok(())
        }

        fn dispatch_prepare(
            &mut self,
            _context: ContextHandle,
            desc: &PrepareDesc,
        ) -> Result<(), FrameGenError> {
            if self.fail_prepare {
                return Err(FrameGenError::Engine("prepare failed".into()));
            }
            self.calls.borrow_mut().push(Call::Prepare(desc.frame_id));
            Ok(())
        }

        fn dispatch_generate(
            &mut self,
            _context: ContextHandle,
            desc: &GenerateDesc,
        ) -> Result<(), FrameGenError> {
            self.calls.borrow_mut().push(Call::Generate {
                frame_id: desc.frame_id,
                reset: desc.reset,
            });
            Ok(())
        }

        fn query_interpolation_output(
            &mut self,
            _context: ContextHandle,
        ) -> Result<FrameResource, FrameGenError> {
            self.calls.borrow_mut().push(Call::Query);
            Ok(resource(9))
        }

        fn destroy_context(&mut self, _context: ContextHandle) {
            self.calls.borrow_mut().push(Call::Destroy);
        }
    }

    pub fn resource(raw: u64) -> FrameResource {
        FrameResource {
            image: vk::Image::from_raw(raw),
            view: vk::ImageView::from_raw(raw),
            format: vk::Format::B8G8R8A8_UNORM,
            extent: vk::Extent2D {
                width: 64,
                height: 32,
            },
            layout: vk::ImageLayout::GENERAL,
        }
    }

    pub fn create_desc() -> CreateDesc {
        let extent = vk::Extent2D {
            width: 64,
            height: 32,
        };

        CreateDesc {
            display_size: extent,
            max_render_size: extent,
            back_buffer_format: vk::Format::B8G8R8A8_UNORM,
            flags: CreateFlags::default(),
        }
    }

    pub fn settings(mode: DispatchMode) -> GenerationSettings {
        GenerationSettings {
            enabled: true,
            generation_rect: GenerationRect::full(create_desc().display_size),
            only_present_generated: false,
            dispatch_mode: mode,
            swapchain: vk::SwapchainKHR::from_raw(3),
        }
    }

    pub fn prepare_desc(frame_id: u64) -> PrepareDesc {
        PrepareDesc {
            command_buffer: vk::CommandBuffer::from_raw(1),
            depth: resource(4),
            motion_vectors: resource(5),
            jitter_offset: glam::Vec2::ZERO,
            motion_vector_scale: glam::Vec2::new(64.0, 32.0),
            frame_time_delta: 33.3,
            render_size: create_desc().display_size,
            camera_fov_vertical: 45f32.to_radians(),
            camera_near: 0.1,
            camera_far: 512.0,
            view_space_to_meters: 0.0,
            frame_id,
        }
    }

    pub fn generate_desc(frame_id: u64, reset: bool) -> GenerateDesc {
        GenerateDesc {
            command_buffer: vk::CommandBuffer::from_raw(2),
            present_color: resource(6),
            output: resource(9),
            generation_rect: GenerationRect::full(create_desc().display_size),
            num_generated_frames: 1,
            frame_id,
            reset,
        }
    }

    fn created() -> (FrameGenerationContext<RecordingBackend>, Rc<RefCell<Vec<Call>>>) {
        let backend = RecordingBackend::default();
        let calls = backend.calls.clone();
        let mut context =
            FrameGenerationContext::new(backend).with_producer(Box::new(DispatchThroughEngine));
        context.create(&create_desc()).unwrap();
        (context, calls)
    }

    #[test]
    fn dispatch_without_configure_is_rejected() {
        let (mut context, calls) = created();

        let err = context.dispatch_prepare(&prepare_desc(0)).unwrap_err();

        assert!(matches!(err, FrameGenError::NotConfigured(_)));
        assert_eq!(*calls.borrow(), vec![Call::Create]);
    }

    #[test]
    fn one_configure_arms_one_dispatch() {
        let (mut context, _) = created();
        let settings = settings(DispatchMode::Manual);

        context.configure(ConfigureDesc::for_frame(&settings, 0)).unwrap();
        context.dispatch_prepare(&prepare_desc(0)).unwrap();

        let err = context.dispatch_generate(&generate_desc(0, false)).unwrap_err();
        assert!(matches!(err, FrameGenError::NotConfigured("dispatch generate")));

        context.configure(ConfigureDesc::for_frame(&settings, 0)).unwrap();
        assert_eq!(
            context.dispatch_generate(&generate_desc(0, false)).unwrap(),
            DispatchOutcome::Recorded
        );
    }

    #[test]
    fn stale_frame_id_is_rejected() {
        let (mut context, _) = created();
        let settings = settings(DispatchMode::Manual);

        context.end_frame();

        let err = context
            .configure(ConfigureDesc::for_frame(&settings, 0))
            .unwrap_err();
        assert!(matches!(
            err,
            FrameGenError::StaleFrameId {
                expected: 1,
                found: 0
            }
        ));

        context.configure(ConfigureDesc::for_frame(&settings, 1)).unwrap();
        let err = context.dispatch_prepare(&prepare_desc(0)).unwrap_err();
        assert!(matches!(err, FrameGenError::StaleFrameId { .. }));
    }

    #[test]
    fn configuration_does_not_carry_over_frames() {
        let (mut context, _) = created();
        let settings = settings(DispatchMode::Manual);

        context.configure(ConfigureDesc::for_frame(&settings, 0)).unwrap();
        context.end_frame();

        let err = context.dispatch_prepare(&prepare_desc(1)).unwrap_err();
        assert!(matches!(err, FrameGenError::NotConfigured(_)));
    }

    #[test]
    fn generate_needs_prepare_of_the_same_frame() {
        let (mut context, _) = created();
        let settings = settings(DispatchMode::Manual);

        context.configure(ConfigureDesc::for_frame(&settings, 0)).unwrap();
        let err = context.dispatch_generate(&generate_desc(0, false)).unwrap_err();

        assert!(matches!(err, FrameGenError::PrepareMissing(0)));
    }

    #[test]
    fn failed_prepare_does_not_count_as_prepared() {
        let backend = RecordingBackend {
            fail_prepare: true,
            ..Default::default()
        };
        let calls = backend.calls.clone();
        let mut context = FrameGenerationContext::new(backend);
        context.create(&create_desc()).unwrap();
        let settings = settings(DispatchMode::Manual);

        context.configure(ConfigureDesc::for_frame(&settings, 0)).unwrap();
        assert!(matches!(
            context.dispatch_prepare(&prepare_desc(0)),
            Err(FrameGenError::Engine(_))
        ));

        context.configure(ConfigureDesc::for_frame(&settings, 0)).unwrap();
        let err = context.dispatch_generate(&generate_desc(0, false)).unwrap_err();

        assert!(matches!(err, FrameGenError::PrepareMissing(0)));
        assert!(!calls
            .borrow()
            .iter()
            .any(|call| matches!(call, Call::Generate { .. })));
    }

    #[test]
    fn frame_ids_reach_the_engine_in_order() {
        let (mut context, calls) = created();
        let settings = settings(DispatchMode::Manual);

        for _ in 0..3 {
            context
                .dispatch_frame(&settings, prepare_desc(99), generate_desc(99, false))
                .unwrap();
            context.end_frame();
        }

        let ids: Vec<u64> = calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                Call::Generate { frame_id, .. } => Some(*frame_id),
                _ => None,
            })
            .collect();

        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(
            calls.borrow()[1..6].to_vec(),
            vec![
                Call::Configure(0),
                Call::Prepare(0),
                Call::Configure(0),
                Call::Generate {
                    frame_id: 0,
                    reset: false
                },
                Call::Configure(1),
            ]
        );
    }

    #[test]
    fn disabled_generation_still_advances_frames() {
        let (mut context, calls) = created();
        let mut settings = settings(DispatchMode::Manual);
        settings.enabled = false;

        let outcome = context
            .dispatch_frame(&settings, prepare_desc(0), generate_desc(0, false))
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Skipped);
        assert_eq!(context.end_frame(), 1);
        assert!(!calls
            .borrow()
            .iter()
            .any(|call| matches!(call, Call::Prepare(_) | Call::Generate { .. })));
    }

    #[test]
    fn callback_mode_goes_through_the_producer() {
        let (mut context, calls) = created();
        let settings = settings(DispatchMode::Callback);

        context.configure(ConfigureDesc::for_frame(&settings, 0)).unwrap();
        context.dispatch_prepare(&prepare_desc(0)).unwrap();
        context.configure(ConfigureDesc::for_frame(&settings, 0)).unwrap();

        let err = context.dispatch_generate(&generate_desc(0, true)).unwrap_err();
        assert!(matches!(err, FrameGenError::WrongDispatchMode { .. }));

        context.configure(ConfigureDesc::for_frame(&settings, 0)).unwrap();
        context.present(&generate_desc(0, true)).unwrap();

        assert_eq!(
            calls.borrow().last(),
            Some(&Call::Generate {
                frame_id: 0,
                reset: true
            })
        );
    }

    #[test]
    fn callback_mode_needs_a_producer() {
        let mut context = FrameGenerationContext::new(RecordingBackend::default());
        context.create(&create_desc()).unwrap();

        let err = context
            .configure(ConfigureDesc::for_frame(&settings(DispatchMode::Callback), 0))
            .unwrap_err();

        assert!(matches!(err, FrameGenError::MissingProducer));
    }

    #[test]
    fn rejected_create_leaves_context_uninitialized() {
        let backend = RecordingBackend {
            reject_create: true,
            ..Default::default()
        };
        let mut context = FrameGenerationContext::new(backend);

        assert!(matches!(
            context.create(&create_desc()),
            Err(FrameGenError::ContextRejected(_))
        ));
        assert_eq!(context.state(), ContextState::Uninitialized);
        assert!(matches!(
            context.configure(ConfigureDesc::for_frame(&settings(DispatchMode::Manual), 0)),
            Err(FrameGenError::InvalidState { .. })
        ));
    }

    #[test]
    fn create_twice_is_rejected() {
        let (mut context, _) = created();

        assert!(matches!(
            context.create(&create_desc()),
            Err(FrameGenError::InvalidState { .. })
        ));
    }

    #[test]
    fn destroy_happens_once() {
        let (mut context, calls) = created();

        context.destroy().unwrap();
        assert!(matches!(context.destroy(), Err(FrameGenError::AlreadyDestroyed)));
        assert!(matches!(
            context.interpolation_output(),
            Err(FrameGenError::AlreadyDestroyed)
        ));

        drop(context);

        let destroys = calls
            .borrow()
            .iter()
            .filter(|call| **call == Call::Destroy)
            .count();
        assert_eq!(destroys, 1);
    }

    #[test]
    fn drop_destroys_a_live_context() {
        let (context, calls) = created();

        drop(context);

        assert_eq!(calls.borrow().last(), Some(&Call::Destroy));
    }

    #[test]
    fn interpolation_output_is_queried_from_the_engine() {
        let (mut context, calls) = created();

        let output = context.interpolation_output().unwrap();

        assert_eq!(output, resource(9));
        assert_eq!(calls.borrow().last(), Some(&Call::Query));
    }
}
